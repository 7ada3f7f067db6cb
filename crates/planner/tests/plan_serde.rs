use sysproc_common::{DependencyId, FragmentId, Value};
use sysproc_planner::{Fragment, ParameterSet, Plan};

#[test]
fn plan_is_serializable() {
    // distribute -> aggregate with a parameter payload
    let plan = Plan::distribute_aggregate(
        Fragment::distribute(FragmentId(1), DependencyId(1)).with_parameters(ParameterSet::new(
            vec![Value::from("orders"), Value::BigInt(100)],
        )),
        Fragment::aggregate(FragmentId(2), DependencyId(2), vec![DependencyId(1)]),
    )
    .unwrap();

    let s = serde_json::to_string(&plan).unwrap();
    let back: Plan = serde_json::from_str(&s).unwrap();
    assert_eq!(back.fragments(), plan.fragments());
    assert_eq!(back.terminal_dependencies(), plan.terminal_dependencies());
}
