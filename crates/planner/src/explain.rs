use crate::fragment::Fragment;
use crate::plan::Plan;

/// Render a plan as human-readable multiline text, one block per layer.
pub fn explain_plan(plan: &Plan) -> String {
    let mut s = String::new();
    let terminals = plan
        .terminal_dependencies()
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",");
    s.push_str(&format!(
        "Plan fragments={} terminal=[{terminals}]\n",
        plan.fragments().len()
    ));
    for (depth, layer) in plan.layers().into_iter().enumerate() {
        s.push_str(&format!("  layer {depth}\n"));
        for idx in layer {
            fmt_fragment(&plan.fragments()[idx], 2, &mut s);
        }
    }
    s
}

fn fmt_fragment(f: &Fragment, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let inputs = f
        .input_dependencies
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&format!(
        "{pad}Fragment id={} scope={} out={} in=[{inputs}]",
        f.fragment_id,
        f.scope.as_str(),
        f.output_dependency
    ));
    if let Some(p) = f.target_partition {
        out.push_str(&format!(" partition={p}"));
    }
    out.push_str(&format!(" params={}\n", f.parameters.len()));
}

#[cfg(test)]
mod tests {
    use super::explain_plan;
    use crate::{Fragment, Plan};
    use sysproc_common::{DependencyId, FragmentId, PartitionId};

    #[test]
    fn explains_layers_and_routing() {
        let plan = Plan::distribute_aggregate(
            Fragment::distribute(FragmentId(20), DependencyId(20)).on_partition(PartitionId(2)),
            Fragment::aggregate(FragmentId(21), DependencyId(21), vec![DependencyId(20)]),
        )
        .expect("plan");
        let text = explain_plan(&plan);
        assert!(text.starts_with("Plan fragments=2 terminal=[21]"));
        assert!(text.contains("layer 1"));
        assert!(text.contains("id=20 scope=SinglePartition out=20 in=[] partition=2"));
        assert!(text.contains("id=21 scope=SinglePartition out=21 in=[20]"));
    }
}
