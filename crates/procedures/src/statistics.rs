//! Statistics and row counts.

use arrow::record_batch::RecordBatch;
use sysproc_common::{Result, SiteId, SysprocError, Value};
use sysproc_execution::table::{i64_column, string_column};
use sysproc_execution::{
    DependencyTables, FragmentRegistry, Reconcile, SiteContext, reconcile, rows_to_batch,
    schemas, sum_counts, union_dependency,
};
use sysproc_planner::{Fragment, FragmentScope, ParameterSet, Plan};
use sysproc_storage::TableDef;

use crate::ids::{PARTITION_COUNT, ROW_COUNT_AGGREGATOR, TABLE_AGGREGATOR, TABLE_DATA, dep};
use crate::system::SystemProcedures;

/// What `statistics` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsSelector {
    /// Per-site tuple counts of every table.
    Table,
    PartitionCount,
}

impl StatisticsSelector {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TABLE" => Ok(Self::Table),
            "PARTITIONCOUNT" | "PARTITION_COUNT" => Ok(Self::PartitionCount),
            other => Err(SysprocError::Validation(format!(
                "invalid statistics selector {other}"
            ))),
        }
    }
}

fn table_type(table: &TableDef) -> &'static str {
    if table.is_replicated() {
        "REPLICATED"
    } else {
        "PARTITIONED"
    }
}

pub(crate) fn register(registry: &FragmentRegistry) {
    registry.register_fn(TABLE_DATA, table_data);
    registry.register_fn(
        TABLE_AGGREGATOR,
        |_: &SiteContext, inputs: &DependencyTables, _: &ParameterSet| {
            union_dependency(inputs, dep(TABLE_DATA), &schemas::table_stats())
        },
    );
    registry.register_fn(
        PARTITION_COUNT,
        |ctx: &SiteContext, _: &DependencyTables, _: &ParameterSet| {
            rows_to_batch(
                schemas::partition_count(),
                vec![vec![Value::BigInt(ctx.router.partition_count() as i64)]],
            )
        },
    );
    registry.register_fn(ROW_COUNT_AGGREGATOR, row_count_aggregate);
}

/// One `table_stats` row per table held by this site. Parameter 0 optionally
/// names a single table; an empty name means every table.
fn table_data(
    ctx: &SiteContext,
    _inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let only = params.get_str(0, "table")?;
    let catalog = ctx.catalog();
    let tables = if only.is_empty() {
        catalog.tables()
    } else {
        vec![catalog.get(only)?]
    };
    table_stats_batch(ctx, &tables)
}

/// One `table_stats` row per table as stored on this site.
pub(crate) fn table_stats_batch(ctx: &SiteContext, tables: &[&TableDef]) -> Result<RecordBatch> {
    let mut rows = Vec::with_capacity(tables.len());
    for table in tables.iter().copied() {
        let count = ctx.store.row_count(table)?;
        rows.push(vec![
            Value::BigInt(ctx.host_id().0 as i64),
            Value::from(ctx.hostname()),
            Value::BigInt(ctx.site_id.0 as i64),
            Value::BigInt(ctx.partition_id.0 as i64),
            Value::Varchar(table.name.clone()),
            Value::from(table_type(table)),
            Value::BigInt(count as i64),
        ]);
    }
    rows_to_batch(schemas::table_stats(), rows)
}

/// Reduce per-site counts of one table: replicas must agree, partitions add up.
fn row_count_aggregate(
    ctx: &SiteContext,
    inputs: &DependencyTables,
    params: &ParameterSet,
) -> Result<RecordBatch> {
    let catalog = ctx.catalog();
    let table = catalog.get(params.get_str(0, "table")?)?;
    let stats = union_dependency(inputs, dep(TABLE_DATA), &schemas::table_stats())?;
    let sites = i64_column(&stats, "SITE_ID")?;
    let names = string_column(&stats, "TABLE_NAME")?;
    let counts = i64_column(&stats, "TUPLE_COUNT")?;
    let per_site = sites
        .iter()
        .zip(&names)
        .zip(&counts)
        .filter(|((_, name), _)| name.eq_ignore_ascii_case(&table.name))
        .map(|((site, _), count)| (SiteId(*site as u64), *count))
        .collect::<Vec<_>>();
    let total = if table.is_replicated() {
        reconcile(
            &format!("row count of replicated table {}", table.name),
            Reconcile::Equal,
            &per_site,
        )?
    } else {
        sum_counts(
            &format!("row count of {}", table.name),
            per_site.iter().map(|(_, c)| *c),
        )?
    };
    rows_to_batch(
        schemas::row_count(),
        vec![vec![
            Value::Varchar(table.name.clone()),
            Value::from(table_type(table)),
            Value::BigInt(total),
        ]],
    )
}

/// Plan behind [`SystemProcedures::statistics`].
pub fn statistics_plan(selector: StatisticsSelector) -> Result<Plan> {
    match selector {
        StatisticsSelector::Table => Plan::distribute_aggregate(
            Fragment::distribute(TABLE_DATA, dep(TABLE_DATA))
                .with_parameters(ParameterSet::new(vec![Value::from("")])),
            Fragment::aggregate(TABLE_AGGREGATOR, dep(TABLE_AGGREGATOR), vec![dep(TABLE_DATA)]),
        ),
        StatisticsSelector::PartitionCount => Plan::new(
            vec![Fragment::new(
                PARTITION_COUNT,
                dep(PARTITION_COUNT),
                FragmentScope::SinglePartition,
            )],
            vec![dep(PARTITION_COUNT)],
        ),
    }
}

/// Plan behind [`SystemProcedures::row_count`].
pub fn row_count_plan(table: &str) -> Result<Plan> {
    let name = ParameterSet::new(vec![Value::from(table)]);
    Plan::distribute_aggregate(
        Fragment::distribute(TABLE_DATA, dep(TABLE_DATA)).with_parameters(name.clone()),
        Fragment::aggregate(
            ROW_COUNT_AGGREGATOR,
            dep(ROW_COUNT_AGGREGATOR),
            vec![dep(TABLE_DATA)],
        )
        .with_parameters(name),
    )
}

impl SystemProcedures {
    /// `TABLE`: `HOST_ID, HOSTNAME, SITE_ID, PARTITION_ID, TABLE_NAME,
    /// TABLE_TYPE, TUPLE_COUNT`. `PARTITIONCOUNT`: `PARTITION_COUNT`.
    pub async fn statistics(&self, selector: &str) -> Result<RecordBatch> {
        let selector = StatisticsSelector::parse(selector)?;
        let terminal = match selector {
            StatisticsSelector::Table => dep(TABLE_AGGREGATOR),
            StatisticsSelector::PartitionCount => dep(PARTITION_COUNT),
        };
        self.run_plan("statistics", &statistics_plan(selector)?, terminal)
            .await
    }

    /// `TABLE_NAME, TABLE_TYPE, ROW_COUNT` for one table.
    ///
    /// Fails with a reconciliation error when replicas of a replicated table
    /// disagree.
    pub async fn row_count(&self, table: &str) -> Result<RecordBatch> {
        let catalog = self.catalog();
        let def = catalog.get(table)?;
        self.run_plan(
            "row_count",
            &row_count_plan(&def.name)?,
            dep(ROW_COUNT_AGGREGATOR),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors() {
        assert_eq!(
            StatisticsSelector::parse("table").expect("table"),
            StatisticsSelector::Table
        );
        assert_eq!(
            StatisticsSelector::parse("PARTITIONCOUNT").expect("count"),
            StatisticsSelector::PartitionCount
        );
        assert!(
            StatisticsSelector::parse("MEMORY")
                .expect_err("unsupported")
                .is_validation()
        );
    }

    #[test]
    fn plans_have_expected_shape() {
        let plan = statistics_plan(StatisticsSelector::Table).expect("plan");
        assert_eq!(plan.fragments().len(), 2);
        assert_eq!(plan.terminal_dependencies(), &[dep(TABLE_AGGREGATOR)]);
        let plan = statistics_plan(StatisticsSelector::PartitionCount).expect("plan");
        assert_eq!(plan.fragments()[0].scope, FragmentScope::SinglePartition);
        let plan = row_count_plan("T").expect("plan");
        assert_eq!(plan.fragments()[1].parameters, ParameterSet::new(vec![Value::from("T")]));
    }
}
