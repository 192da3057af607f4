//! Caller-paced walk through the sample's phases.
//!
//! [`Walkthrough`] sequences a planned [`ProvisioningWorkflow`] through a
//! fixed list of steps. The caller decides when each step runs, which lets a
//! terminal front end pause for confirmation before anything disruptive.

use std::fmt;

use crate::provider::ProviderClient;
use crate::workflow::{LifecycleOp, ProvisioningWorkflow, TeardownOutcome, WorkflowError};

/// One phase of the walkthrough.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Create every planned resource.
    Provision,
    /// List the resources in the group.
    Inventory,
    /// Export the group's template.
    ExportTemplate,
    /// Power the machine off.
    PowerOff,
    /// Start the machine.
    Start,
    /// Restart the machine.
    Restart,
    /// Delete the group.
    Teardown,
}

impl Step {
    /// Steps in execution order.
    pub const SEQUENCE: [Self; 7] = [
        Self::Provision,
        Self::Inventory,
        Self::ExportTemplate,
        Self::PowerOff,
        Self::Start,
        Self::Restart,
        Self::Teardown,
    ];

    /// Returns `true` when a front end should confirm before running the step.
    #[must_use]
    pub const fn requires_confirmation(self) -> bool {
        matches!(
            self,
            Self::PowerOff | Self::Start | Self::Restart | Self::Teardown
        )
    }

    /// Short imperative description used in prompts.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Provision => "create the resource group and its resources",
            Self::Inventory => "list the resources in the group",
            Self::ExportTemplate => "export the group's template",
            Self::PowerOff => "power off the virtual machine",
            Self::Start => "start the virtual machine",
            Self::Restart => "restart the virtual machine",
            Self::Teardown => "delete the resource group",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Provision => "provision",
            Self::Inventory => "inventory",
            Self::ExportTemplate => "export-template",
            Self::PowerOff => "power-off",
            Self::Start => "start",
            Self::Restart => "restart",
            Self::Teardown => "teardown",
        })
    }
}

/// Human-readable outcome of a completed step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepReport {
    /// Step that ran.
    pub step: Step,
    /// One-line summary.
    pub summary: String,
    /// Further lines, such as one per listed resource.
    pub details: Vec<String>,
}

impl StepReport {
    fn new(step: Step, summary: impl Into<String>) -> Self {
        Self {
            step,
            summary: summary.into(),
            details: Vec::new(),
        }
    }

    fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.step, self.summary)?;
        for line in &self.details {
            write!(f, "\n  {line}")?;
        }
        Ok(())
    }
}

type StepResult<P> = Result<StepReport, WorkflowError<<P as ProviderClient>::Error>>;

/// Drives a planned workflow one step at a time.
#[derive(Debug)]
pub struct Walkthrough<P> {
    workflow: ProvisioningWorkflow<P>,
    vm_name: String,
    cursor: usize,
}

impl<P> Walkthrough<P>
where
    P: ProviderClient,
{
    /// Wraps a planned workflow; `vm_name` is the lifecycle target.
    #[must_use]
    pub fn new(workflow: ProvisioningWorkflow<P>, vm_name: impl Into<String>) -> Self {
        Self {
            workflow,
            vm_name: vm_name.into(),
            cursor: 0,
        }
    }

    /// Step the next call to [`Walkthrough::next`] will run.
    #[must_use]
    pub fn peek(&self) -> Option<Step> {
        Step::SEQUENCE.get(self.cursor).copied()
    }

    /// Underlying workflow.
    #[must_use]
    pub const fn workflow(&self) -> &ProvisioningWorkflow<P> {
        &self.workflow
    }

    /// Runs the upcoming step.
    ///
    /// Returns `None` once every step has run. A failed step is returned as
    /// `Some(Err(_))` and the cursor stays on it.
    pub async fn next(&mut self) -> Option<StepResult<P>> {
        let step = self.peek()?;
        tracing::info!(step = %step, "running walkthrough step");
        let result = self.run(step).await;
        match &result {
            Ok(_) => self.cursor += 1,
            Err(err) => tracing::warn!(step = %step, error = %err, "walkthrough step failed"),
        }
        Some(result)
    }

    /// Abandons the remaining steps and deletes the group.
    ///
    /// # Errors
    ///
    /// Propagates the teardown error; the walkthrough is finished either way.
    pub async fn abort(&mut self) -> StepResult<P> {
        self.cursor = Step::SEQUENCE.len();
        tracing::info!("aborting walkthrough, deleting resource group");
        self.teardown().await
    }

    async fn run(&mut self, step: Step) -> StepResult<P> {
        match step {
            Step::Provision => {
                let live = self.workflow.apply().await?;
                let details = live.iter().map(ToString::to_string).collect();
                Ok(StepReport::new(step, format!("created {} resources", live.len()))
                    .with_details(details))
            }
            Step::Inventory => {
                let listed = self.workflow.list_resources().await?;
                let details = listed.iter().map(ToString::to_string).collect();
                Ok(StepReport::new(step, format!("group holds {} resources", listed.len()))
                    .with_details(details))
            }
            Step::ExportTemplate => {
                let template = self.workflow.export_template().await?;
                Ok(StepReport::new(step, "exported template")
                    .with_details(template.lines().map(str::to_owned).collect()))
            }
            Step::PowerOff => self.lifecycle(step, LifecycleOp::Stop, "powered off").await,
            Step::Start => self.lifecycle(step, LifecycleOp::Start, "started").await,
            Step::Restart => self.lifecycle(step, LifecycleOp::Restart, "restarted").await,
            Step::Teardown => self.teardown().await,
        }
    }

    async fn lifecycle(&mut self, step: Step, op: LifecycleOp, verb: &str) -> StepResult<P> {
        self.workflow.lifecycle(op, &self.vm_name).await?;
        Ok(StepReport::new(step, format!("{verb} {}", self.vm_name)))
    }

    async fn teardown(&mut self) -> StepResult<P> {
        let group = self
            .workflow
            .target()
            .map(|target| target.group_name.clone())
            .unwrap_or_default();
        let summary = match self.workflow.teardown().await? {
            TeardownOutcome::Deleted => format!("deleted resource group {group}"),
            TeardownOutcome::AlreadyDeleted => format!("resource group {group} already deleted"),
        };
        Ok(StepReport::new(Step::Teardown, summary))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::descriptor::{PropertyValue, ResourceDescriptor, ResourceKind};
    use crate::provider::PowerAction;
    use crate::test_support::ScriptedProvider;
    use crate::workflow::{DeploymentTarget, WorkflowSettings, WorkflowState};

    fn walkthrough(provider: &ScriptedProvider) -> Walkthrough<ScriptedProvider> {
        let group = ResourceDescriptor::builder(ResourceKind::ResourceGroup, "g")
            .location("westus")
            .build()
            .expect("group");
        let vm = ResourceDescriptor::builder(ResourceKind::VirtualMachine, "vm")
            .location("westus")
            .depends_on("g")
            .property("hardwareProfile", PropertyValue::map([("vmSize", "A0")]))
            .property("storageProfile", PropertyValue::map([("osDisk", "d")]))
            .property("osProfile", PropertyValue::map([("computerName", "vm")]))
            .property("networkProfile", PropertyValue::map([("nics", "n")]))
            .build()
            .expect("vm");
        let mut workflow = ProvisioningWorkflow::new(
            provider.clone(),
            WorkflowSettings {
                step_timeout: Duration::from_secs(5),
                lifecycle_timeout: Duration::from_secs(5),
                teardown_timeout: Duration::from_secs(5),
            },
        );
        workflow
            .plan(DeploymentTarget::new("g", "westus").expect("target"), vec![group, vm])
            .expect("plan");
        Walkthrough::new(workflow, "vm")
    }

    #[rstest]
    #[tokio::test(flavor = "current_thread")]
    async fn walkthrough_runs_every_step_in_order() {
        let provider = ScriptedProvider::new();
        let mut walk = walkthrough(&provider);
        let mut seen = Vec::new();
        while let Some(result) = walk.next().await {
            seen.push(result.expect("step should succeed").step);
        }

        assert_eq!(seen, Step::SEQUENCE);
        assert_eq!(walk.peek(), None);
        assert_eq!(walk.workflow().state(), WorkflowState::Deleted);
        assert_eq!(
            provider.power_actions(),
            vec![PowerAction::PowerOff, PowerAction::Start, PowerAction::Restart]
        );
    }

    #[rstest]
    #[tokio::test(flavor = "current_thread")]
    async fn failed_step_keeps_the_cursor() {
        let provider = ScriptedProvider::new();
        provider.fail_power(PowerAction::PowerOff);
        let mut walk = walkthrough(&provider);
        for _ in 0..3 {
            walk.next().await.expect("step").expect("early steps succeed");
        }

        let result = walk.next().await.expect("power-off runs");
        assert!(result.is_err());
        assert_eq!(walk.peek(), Some(Step::PowerOff));

        let report = walk.abort().await.expect("abort deletes the group");
        assert_eq!(report.step, Step::Teardown);
        assert_eq!(walk.peek(), None);
    }

    #[rstest]
    #[case(Step::Provision, false)]
    #[case(Step::ExportTemplate, false)]
    #[case(Step::PowerOff, true)]
    #[case(Step::Teardown, true)]
    fn confirmation_flags(#[case] step: Step, #[case] expected: bool) {
        assert_eq!(step.requires_confirmation(), expected);
    }

    #[rstest]
    fn report_renders_details_on_separate_lines() {
        let report = StepReport::new(Step::Inventory, "group holds 1 resources")
            .with_details(vec![String::from("vm")]);
        assert_eq!(report.to_string(), "[inventory] group holds 1 resources\n  vm");
    }
}
