//! BDD step definitions for the provisioning workflow.

use armflow::test_support::ProviderCall;
use armflow::{LifecycleOp, ResourceKind, TeardownOutcome};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{
    DeclaredResource, WorkflowContext, build_descriptor, describe_failure, target,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))
}

fn split_names(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

#[given("a stack with group \"{group}\", network \"{network}\", and machine \"{machine}\"")]
fn small_stack(
    mut workflow_context: WorkflowContext,
    group: String,
    network: String,
    machine: String,
) -> WorkflowContext {
    workflow_context.declared = vec![
        DeclaredResource::new(ResourceKind::ResourceGroup, &group, &[]),
        DeclaredResource::new(ResourceKind::VirtualNetwork, &network, &[group.as_str()]),
        DeclaredResource::new(ResourceKind::VirtualMachine, &machine, &[network.as_str()]),
    ];
    workflow_context
}

#[given("a chain of resources \"{names}\"")]
fn resource_chain(mut workflow_context: WorkflowContext, names: String) -> WorkflowContext {
    let mut previous: Option<String> = None;
    for name in split_names(&names) {
        let entry = match &previous {
            None => DeclaredResource::new(ResourceKind::ResourceGroup, &name, &[]),
            Some(parent) => {
                DeclaredResource::new(ResourceKind::VirtualNetwork, &name, &[parent.as_str()])
            }
        };
        workflow_context.declared.push(entry);
        previous = Some(name);
    }
    workflow_context
}

#[given("creation of \"{name}\" fails")]
fn creation_fails(workflow_context: WorkflowContext, name: String) -> WorkflowContext {
    workflow_context.provider.fail_create(&name);
    workflow_context
}

#[given("\"{name}\" also depends on \"{dependency}\"")]
fn extra_dependency(
    mut workflow_context: WorkflowContext,
    name: String,
    dependency: String,
) -> WorkflowContext {
    if let Some(entry) = workflow_context
        .declared
        .iter_mut()
        .find(|entry| entry.name == name)
    {
        entry.depends_on.push(dependency);
    }
    workflow_context
}

#[when("I plan and apply the stack")]
fn plan_and_apply(mut workflow_context: WorkflowContext) -> Result<WorkflowContext, StepError> {
    let runtime = runtime()?;
    let descriptors = workflow_context
        .declared
        .iter()
        .map(build_descriptor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| StepError::Assertion(format!("descriptor fixture: {err}")))?;
    let deployment = target(&workflow_context.declared)
        .map_err(|err| StepError::Assertion(format!("target fixture: {err}")))?;

    if let Err(err) = workflow_context.workflow.plan(deployment, descriptors) {
        workflow_context.failure = Some(describe_failure(&err));
        return Ok(workflow_context);
    }
    let applied =
        runtime.block_on(async { workflow_context.workflow.apply().await.map(|_live| ()) });
    workflow_context.failure = applied.err().map(|err| describe_failure(&err));
    Ok(workflow_context)
}

fn run_lifecycle(
    mut workflow_context: WorkflowContext,
    op: LifecycleOp,
    machine: &str,
) -> Result<WorkflowContext, StepError> {
    let runtime = runtime()?;
    let result = runtime.block_on(workflow_context.workflow.lifecycle(op, machine));
    workflow_context.failure = result.err().map(|err| describe_failure(&err));
    Ok(workflow_context)
}

#[when("I stop the machine \"{machine}\"")]
fn stop_machine(
    workflow_context: WorkflowContext,
    machine: String,
) -> Result<WorkflowContext, StepError> {
    run_lifecycle(workflow_context, LifecycleOp::Stop, &machine)
}

#[when("I start the machine \"{machine}\"")]
fn start_machine(
    workflow_context: WorkflowContext,
    machine: String,
) -> Result<WorkflowContext, StepError> {
    run_lifecycle(workflow_context, LifecycleOp::Start, &machine)
}

#[when("I restart the machine \"{machine}\"")]
fn restart_machine(
    workflow_context: WorkflowContext,
    machine: String,
) -> Result<WorkflowContext, StepError> {
    run_lifecycle(workflow_context, LifecycleOp::Restart, &machine)
}

#[when("I tear down the workflow")]
fn tear_down(mut workflow_context: WorkflowContext) -> Result<WorkflowContext, StepError> {
    let runtime = runtime()?;
    match runtime.block_on(workflow_context.workflow.teardown()) {
        Ok(outcome) => {
            workflow_context.last_teardown = Some(outcome);
            workflow_context.failure = None;
        }
        Err(err) => workflow_context.failure = Some(describe_failure(&err)),
    }
    Ok(workflow_context)
}

#[then("resources are created in the order \"{names}\"")]
fn created_in_order(workflow_context: &WorkflowContext, names: String) -> Result<(), StepError> {
    assert_creation_calls(workflow_context, &names)
}

#[then("creation was attempted in the order \"{names}\"")]
fn attempted_in_order(workflow_context: &WorkflowContext, names: String) -> Result<(), StepError> {
    assert_creation_calls(workflow_context, &names)
}

fn assert_creation_calls(workflow_context: &WorkflowContext, names: &str) -> Result<(), StepError> {
    let created = workflow_context.provider.created_names();
    let expected = split_names(names);
    if created == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected creation order {expected:?}, got {created:?}"
        )))
    }
}

#[then("the live resource ids are \"{ids}\"")]
fn live_resource_ids(workflow_context: &WorkflowContext, ids: String) -> Result<(), StepError> {
    let actual: Vec<String> = workflow_context
        .workflow
        .live_resources()
        .iter()
        .map(|live| live.id.clone())
        .collect();
    let expected = split_names(&ids);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected live ids {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the machine \"{machine}\" references the id \"{id}\"")]
fn machine_references(
    workflow_context: &WorkflowContext,
    machine: String,
    id: String,
) -> Result<(), StepError> {
    let properties = workflow_context
        .provider
        .created_properties(&machine)
        .ok_or_else(|| StepError::Assertion(format!("{machine} was never created")))?;
    let referenced = properties
        .pointer("/networkProfile/networkInterfaces/0/id")
        .and_then(serde_json::Value::as_str);
    if referenced == Some(id.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {machine} to reference {id}, got {referenced:?}"
        )))
    }
}

#[then("the workflow state is \"{state}\"")]
fn workflow_state(workflow_context: &WorkflowContext, state: String) -> Result<(), StepError> {
    let actual = workflow_context.workflow.state().to_string();
    if actual == state {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected state {state}, got {actual} (last failure: {:?})",
            workflow_context.failure
        )))
    }
}

#[then("the power actions are \"{actions}\"")]
fn power_actions(workflow_context: &WorkflowContext, actions: String) -> Result<(), StepError> {
    let actual: Vec<String> = workflow_context
        .provider
        .power_actions()
        .into_iter()
        .map(|action| action.as_str().to_owned())
        .collect();
    let expected = split_names(&actions);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected power actions {expected:?}, got {actual:?}"
        )))
    }
}

#[then("no power actions were requested")]
fn no_power_actions(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let actions = workflow_context.provider.power_actions();
    if actions.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no power actions, got {actions:?}"
        )))
    }
}

#[then("the inventory lists {count:usize} resources")]
fn inventory_lists(workflow_context: &WorkflowContext, count: usize) -> Result<(), StepError> {
    let runtime = runtime()?;
    let listed = runtime
        .block_on(workflow_context.workflow.list_resources())
        .map_err(|err| StepError::Assertion(format!("inventory failed: {err}")))?;
    if listed.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} resources, got {}",
            listed.len()
        )))
    }
}

#[then("the group was deleted {count:usize} time")]
fn group_deleted(workflow_context: &WorkflowContext, count: usize) -> Result<(), StepError> {
    let calls = workflow_context.provider.delete_calls();
    if calls == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} delete calls, got {calls}"
        )))
    }
}

#[then("the last teardown reports the group already deleted")]
fn already_deleted(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    match workflow_context.last_teardown {
        Some(TeardownOutcome::AlreadyDeleted) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected AlreadyDeleted, got {other:?}"
        ))),
    }
}

#[then("the workflow failure names the resource \"{resource}\"")]
fn failure_names(workflow_context: &WorkflowContext, resource: String) -> Result<(), StepError> {
    let failure = workflow_context
        .failure
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("expected a failure")))?;
    if failure.resource.as_deref() == Some(resource.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure for {resource}, got {failure:?}"
        )))
    }
}

#[then("the workflow failure is \"{kind}\"")]
fn failure_kind(workflow_context: &WorkflowContext, kind: String) -> Result<(), StepError> {
    match &workflow_context.failure {
        Some(failure) if failure.kind == kind => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {kind} failure, got {other:?}"
        ))),
    }
}

#[then("no provider calls were made")]
fn no_provider_calls(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let calls: Vec<ProviderCall> = workflow_context.provider.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no provider calls, got {calls:?}"
        )))
    }
}
