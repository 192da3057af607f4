//! BDD scenarios for the provisioning workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{WorkflowContext, workflow_context};

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Provision, exercise, and delete a small stack"
)]
fn scenario_full_lifecycle(workflow_context: WorkflowContext) {
    drop(workflow_context);
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Stop at the first failing creation"
)]
fn scenario_first_failure_stops_apply(workflow_context: WorkflowContext) {
    drop(workflow_context);
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Tearing down twice deletes the group once"
)]
fn scenario_idempotent_teardown(workflow_context: WorkflowContext) {
    drop(workflow_context);
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Refuse power transitions after deletion"
)]
fn scenario_lifecycle_after_deletion(workflow_context: WorkflowContext) {
    drop(workflow_context);
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Reject resources that depend on each other"
)]
fn scenario_dependency_cycle(workflow_context: WorkflowContext) {
    drop(workflow_context);
}
