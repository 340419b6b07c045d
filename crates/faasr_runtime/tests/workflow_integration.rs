use faasr_runtime::errors::{
    downcast_kind,
    FaasrErrorKind,
};
use faasr_runtime::graph::Graph;
use faasr_runtime::payload::{
    schema,
    WorkflowDocument,
};
use serde_json::json;

fn linear_chain_doc() -> serde_json::Value {
    json!({
        "ActionList": {
            "start": {
                "FunctionName": "start",
                "Type": "Python",
                "FaaSServer": "gh",
                "InvokeNext": ["middle"]
            },
            "middle": {
                "FunctionName": "middle",
                "Type": "Python",
                "FaaSServer": "gh",
                "InvokeNext": ["end"]
            },
            "end": {
                "FunctionName": "end",
                "Type": "Python",
                "FaaSServer": "gh",
                "InvokeNext": []
            }
        },
        "ComputeServers": {
            "gh": { "FaaSType": "GitHubActions", "UserName": "acme", "ActionRepoName": "wf" }
        },
        "DataStores": {
            "store1": { "Endpoint": "https://s3.example.com", "Bucket": "bucket", "Region": "us-east-1" }
        },
        "DefaultDataStore": "store1",
        "FunctionInvoke": "start"
    })
}

fn fan_out_fan_in_doc() -> serde_json::Value {
    json!({
        "ActionList": {
            "split": {
                "FunctionName": "split",
                "Type": "Python",
                "FaaSServer": "gh",
                "InvokeNext": ["work(3)"]
            },
            "work": {
                "FunctionName": "work",
                "Type": "Python",
                "FaaSServer": "gh",
                "InvokeNext": ["join"]
            },
            "join": {
                "FunctionName": "join",
                "Type": "Python",
                "FaaSServer": "gh",
                "InvokeNext": []
            }
        },
        "ComputeServers": {
            "gh": { "FaaSType": "GitHubActions", "UserName": "acme", "ActionRepoName": "wf" }
        },
        "DataStores": {
            "store1": { "Endpoint": "https://s3.example.com", "Bucket": "bucket", "Region": "us-east-1" }
        },
        "DefaultDataStore": "store1",
        "FunctionInvoke": "split"
    })
}

#[test]
fn linear_chain_passes_schema_and_graph_validation() {
    let doc = linear_chain_doc();
    schema::validate(&doc).expect("schema should accept a well-formed linear chain");

    let parsed: WorkflowDocument = serde_json::from_value(doc).unwrap();
    let graph = Graph::build(&parsed).expect("linear chain is acyclic");

    assert_eq!(graph.successors("start")[0].target, "middle");
    assert_eq!(graph.predecessors("end"), &["middle".to_string()]);
    assert!(!graph.is_fan_in("middle"));
}

#[test]
fn rank_fan_out_expands_into_three_predecessors_of_join() {
    let doc = fan_out_fan_in_doc();
    let parsed: WorkflowDocument = serde_json::from_value(doc).unwrap();
    let graph = Graph::build(&parsed).unwrap();

    let split_edge = &graph.successors("split")[0];
    assert_eq!(split_edge.target, "work");
    assert_eq!(split_edge.rank_count, Some(3));

    // The function-level graph records "work" as a single predecessor of
    // "join"; the fan-in arbiter is what multiplies that by rank_count
    // when deciding how many done-flags to expect.
    assert_eq!(graph.predecessors("join"), &["work".to_string()]);
}

#[test]
fn schema_rejects_action_with_unknown_compute_server() {
    let mut doc = linear_chain_doc();
    doc["ActionList"]["start"]["FaaSServer"] = json!("does-not-exist");
    let err = schema::validate(&doc).unwrap_err();
    assert_eq!(downcast_kind(&err), Some(FaasrErrorKind::SchemaViolation));
}

#[test]
fn graph_rejects_a_cycle_between_two_actions() {
    let mut doc = linear_chain_doc();
    doc["ActionList"]["end"]["InvokeNext"] = json!(["start"]);
    let parsed: WorkflowDocument = serde_json::from_value(doc).unwrap();
    let err = Graph::build(&parsed).unwrap_err();
    assert_eq!(downcast_kind(&err), Some(FaasrErrorKind::CycleDetected));
}
