use std::io::{BufRead, Write};

use arrow::util::pretty::pretty_format_batches;
use tokio::runtime::Runtime;

use crate::call::{PROCEDURE_NAMES, ProcedureCall};
use crate::Engine;

/// Read procedure calls line by line until EOF or `\q`.
///
/// Besides procedure calls the prompt understands `explain <call>`,
/// `tables`, `metrics` and `help`.
pub fn run_repl(
    engine: &Engine,
    runtime: &Runtime,
    input: impl BufRead,
    mut out: impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let default_chunk = engine.config().chunked_default_chunk_size;
    let mut lines = input.lines();
    loop {
        write!(out, "sysproc> ")?;
        out.flush()?;
        // Ctrl+D => EOF => exit
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        if raw == "\\q" || raw.eq_ignore_ascii_case("quit") || raw.eq_ignore_ascii_case("exit") {
            break;
        }
        if raw.eq_ignore_ascii_case("help") {
            writeln!(out, "procedures: {}", PROCEDURE_NAMES.join(", "))?;
            writeln!(out, "also: explain <call>, tables, metrics, \\q")?;
            continue;
        }
        if raw.eq_ignore_ascii_case("tables") {
            writeln!(out, "{}", engine.list_tables().join("\n"))?;
            continue;
        }
        if raw.eq_ignore_ascii_case("metrics") {
            write!(out, "{}", engine.prometheus_metrics())?;
            continue;
        }
        if let Some(rest) = strip_keyword(raw, "explain") {
            match ProcedureCall::parse(rest, default_chunk).and_then(|c| engine.explain(&c)) {
                Ok(text) => writeln!(out, "{text}")?,
                Err(e) => writeln!(out, "error: {e}")?,
            }
            continue;
        }
        let result = ProcedureCall::parse(raw, default_chunk)
            .and_then(|call| runtime.block_on(engine.call(&call)));
        match result {
            Ok(batch) => writeln!(out, "{}", pretty_format_batches(&[batch])?)?,
            Err(e) => writeln!(out, "error: {e}")?,
        }
    }
    Ok(())
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(char::is_whitespace)?;
    head.eq_ignore_ascii_case(keyword).then_some(rest)
}
