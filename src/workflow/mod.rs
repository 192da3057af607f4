//! Provisioning workflow state machine.
//!
//! A [`ProvisioningWorkflow`] owns one provider client and drives it through
//! a single run: `plan` validates a descriptor set, `apply` creates resources
//! in dependency order, `lifecycle` powers the virtual machine off and on,
//! and `teardown` deletes the owning resource group. Partial creation
//! failures are not rolled back; resources created before the failure stay
//! live until `teardown` removes the group.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use crate::descriptor::{ResourceDescriptor, ResourceKind, ValidationError};
use crate::order::{DependencyOrderer, ExecutionOrder, OrderError};
use crate::provider::{LiveResource, ProviderClient};
use crate::template::TemplateExporter;

/// Group and default location a plan is deployed into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentTarget {
    /// Resource group owning every planned resource.
    pub group_name: String,
    /// Default location of the deployment. Stack builders copy it onto each
    /// descriptor; the workflow itself only reports it.
    pub location: String,
}

impl DeploymentTarget {
    /// Creates a target, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] when either value is blank.
    pub fn new(
        group_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let group_name = group_name.into().trim().to_owned();
        let location = location.into().trim().to_owned();
        if group_name.is_empty() {
            return Err(ValidationError::EmptyField(String::from("group_name")));
        }
        if location.is_empty() {
            return Err(ValidationError::EmptyField(String::from("location")));
        }
        Ok(Self {
            group_name,
            location,
        })
    }
}

/// Timeouts bounding each provider call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkflowSettings {
    /// Upper bound for a single create-or-update during `apply`.
    pub step_timeout: Duration,
    /// Upper bound for a stop, start, or restart.
    pub lifecycle_timeout: Duration,
    /// Upper bound for deleting the resource group.
    pub teardown_timeout: Duration,
}

impl WorkflowSettings {
    /// Default step bound, in seconds.
    pub const DEFAULT_STEP_SECS: u64 = 20 * 60;
    /// Default lifecycle bound, in seconds.
    pub const DEFAULT_LIFECYCLE_SECS: u64 = 15 * 60;
    /// Default teardown bound, in seconds.
    pub const DEFAULT_TEARDOWN_SECS: u64 = 30 * 60;
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(Self::DEFAULT_STEP_SECS),
            lifecycle_timeout: Duration::from_secs(Self::DEFAULT_LIFECYCLE_SECS),
            teardown_timeout: Duration::from_secs(Self::DEFAULT_TEARDOWN_SECS),
        }
    }
}

/// Lifecycle state of a workflow run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkflowState {
    /// Nothing has been created yet.
    Planned,
    /// `apply` is creating resources.
    Creating,
    /// Every resource exists and the machine is running.
    Ready,
    /// The machine is being powered off.
    Stopping,
    /// The machine is powered off.
    Stopped,
    /// The machine is being started.
    Starting,
    /// The machine is being restarted.
    Restarting,
    /// The resource group is being deleted.
    Deleting,
    /// The resource group is gone.
    Deleted,
    /// A step failed or timed out; only teardown remains meaningful.
    Failed,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Planned => "planned",
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Restarting => "restarting",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        })
    }
}

/// Power transitions available on the provisioned machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleOp {
    /// Power the machine off.
    Stop,
    /// Power the machine on.
    Start,
    /// Restart the machine.
    Restart,
}

impl LifecycleOp {
    const fn permits(self, state: WorkflowState) -> bool {
        matches!(
            (self, state),
            (Self::Stop | Self::Restart | Self::Start, WorkflowState::Ready)
                | (Self::Start, WorkflowState::Stopped)
        )
    }

    const fn transitional(self) -> WorkflowState {
        match self {
            Self::Stop => WorkflowState::Stopping,
            Self::Start => WorkflowState::Starting,
            Self::Restart => WorkflowState::Restarting,
        }
    }

    const fn settled(self) -> WorkflowState {
        match self {
            Self::Stop => WorkflowState::Stopped,
            Self::Start | Self::Restart => WorkflowState::Ready,
        }
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Restart => "restart",
        })
    }
}

/// Workflow operation, used to give errors their context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Validating a descriptor set.
    Plan,
    /// Creating resources.
    Apply,
    /// Powering the machine off, on, or restarting it.
    Lifecycle(LifecycleOp),
    /// Listing the group's resources.
    Inventory,
    /// Exporting the group's template.
    Export,
    /// Deleting the group.
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan => f.write_str("plan"),
            Self::Apply => f.write_str("apply"),
            Self::Lifecycle(op) => op.fmt(f),
            Self::Inventory => f.write_str("inventory"),
            Self::Export => f.write_str("export"),
            Self::Teardown => f.write_str("teardown"),
        }
    }
}

/// Outcome of a successful [`ProvisioningWorkflow::teardown`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TeardownOutcome {
    /// The provider confirmed the group deletion.
    Deleted,
    /// An earlier teardown already removed the group; nothing was sent.
    AlreadyDeleted,
}

/// Errors surfaced by workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when descriptors or the plan target are malformed.
    #[error("invalid plan: {0}")]
    Validation(#[from] ValidationError),
    /// Raised when the descriptor set cannot be ordered.
    #[error("cannot order resources: {0}")]
    Order(#[from] OrderError),
    /// Raised when an operation is attempted outside its valid state.
    #[error("cannot {operation} while the workflow is {state}")]
    InvalidState {
        /// Operation that was refused.
        operation: Phase,
        /// State at the time of the call.
        state: WorkflowState,
    },
    /// Raised when no plan has been accepted yet.
    #[error("cannot {operation} before a plan has been accepted")]
    NotPlanned {
        /// Operation that was refused.
        operation: Phase,
    },
    /// Raised when a lifecycle target is not a machine this run created.
    #[error("{target} is not a virtual machine created by this workflow")]
    UnknownTarget {
        /// Requested target name.
        target: String,
    },
    /// Raised when a provider call fails.
    #[error("{phase} failed for {resource}: {source}")]
    Provider {
        /// Operation being performed.
        phase: Phase,
        /// Resource the call targeted.
        resource: String,
        /// Kind of that resource, when known.
        kind: Option<ResourceKind>,
        /// Provider-specific error.
        #[source]
        source: ProviderError,
    },
    /// Raised when a provider call does not complete within its bound.
    #[error("{phase} of {resource} did not complete within {}s", .timeout.as_secs())]
    Timeout {
        /// Operation being performed.
        phase: Phase,
        /// Resource the call targeted.
        resource: String,
        /// Bound that expired.
        timeout: Duration,
    },
    /// Raised when deleting the group fails; the workflow stays in
    /// [`WorkflowState::Deleting`] so the caller may retry.
    #[error("failed to delete resource group {group}: {source}")]
    Teardown {
        /// Group that could not be deleted.
        group: String,
        /// Provider-specific error.
        #[source]
        source: ProviderError,
    },
}

#[derive(Clone, Debug)]
struct Plan {
    target: DeploymentTarget,
    order: ExecutionOrder,
}

/// Drives provider calls for one provisioning run.
#[derive(Clone, Debug)]
pub struct ProvisioningWorkflow<P> {
    provider: P,
    settings: WorkflowSettings,
    state: WorkflowState,
    plan: Option<Plan>,
    live: Vec<LiveResource>,
}

type WorkflowResult<T, P> = Result<T, WorkflowError<<P as ProviderClient>::Error>>;

impl<P> ProvisioningWorkflow<P>
where
    P: ProviderClient,
{
    /// Creates a workflow in [`WorkflowState::Planned`] with no plan yet.
    #[must_use]
    pub const fn new(provider: P, settings: WorkflowSettings) -> Self {
        Self {
            provider,
            settings,
            state: WorkflowState::Planned,
            plan: None,
            live: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> WorkflowState {
        self.state
    }

    /// Resources created so far, in creation order.
    #[must_use]
    pub fn live_resources(&self) -> &[LiveResource] {
        &self.live
    }

    /// Accepted creation order, if a plan has been accepted.
    #[must_use]
    pub fn order(&self) -> Option<&ExecutionOrder> {
        self.plan.as_ref().map(|plan| &plan.order)
    }

    /// Accepted deployment target, if a plan has been accepted.
    #[must_use]
    pub fn target(&self) -> Option<&DeploymentTarget> {
        self.plan.as_ref().map(|plan| &plan.target)
    }

    /// Provider the workflow drives.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Validates and orders `descriptors` for deployment into `target`.
    ///
    /// Nothing is created. Re-planning before `apply` replaces the previous
    /// plan.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidState`] after `apply` has started,
    /// [`WorkflowError::Validation`] when the set lacks exactly one resource
    /// group named after the target, and [`WorkflowError::Order`] when the
    /// dependency graph is invalid.
    pub fn plan(
        &mut self,
        target: DeploymentTarget,
        descriptors: Vec<ResourceDescriptor>,
    ) -> WorkflowResult<&ExecutionOrder, P> {
        if self.state != WorkflowState::Planned {
            return Err(WorkflowError::InvalidState {
                operation: Phase::Plan,
                state: self.state,
            });
        }
        check_single_group(&target, &descriptors)?;
        let order = DependencyOrderer::order(descriptors)?;
        tracing::info!(
            group = %target.group_name,
            resources = order.len(),
            "plan accepted"
        );
        let plan = self.plan.insert(Plan { target, order });
        Ok(&plan.order)
    }

    /// Creates every planned resource in dependency order.
    ///
    /// Stops at the first failure, leaving the workflow in
    /// [`WorkflowState::Failed`] and already-created resources live.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotPlanned`] or [`WorkflowError::InvalidState`]
    /// when called out of order, and [`WorkflowError::Provider`],
    /// [`WorkflowError::Timeout`], or [`WorkflowError::Validation`] when a
    /// step fails.
    pub async fn apply(&mut self) -> WorkflowResult<&[LiveResource], P> {
        let Some(plan) = self.plan.as_ref() else {
            return Err(WorkflowError::NotPlanned {
                operation: Phase::Apply,
            });
        };
        if self.state != WorkflowState::Planned {
            return Err(WorkflowError::InvalidState {
                operation: Phase::Apply,
                state: self.state,
            });
        }

        self.state = WorkflowState::Creating;
        let group = plan.target.group_name.as_str();
        tracing::info!(group, steps = plan.order.len(), "applying plan");

        let mut ids = BTreeMap::new();
        for descriptor in plan.order.iter() {
            let resolved = match descriptor.resolve_references(&ids) {
                Ok(resolved) => resolved,
                Err(err) => {
                    self.state = WorkflowState::Failed;
                    return Err(err.into());
                }
            };
            tracing::info!(
                resource = descriptor.name(),
                kind = %descriptor.kind(),
                "creating resource"
            );
            let call = self.provider.create_or_update(group, &resolved);
            match timeout(self.settings.step_timeout, call).await {
                Ok(Ok(live)) => {
                    tracing::debug!(resource = descriptor.name(), id = %live.id, "resource ready");
                    ids.insert(descriptor.name().to_owned(), live.id.clone());
                    self.live.push(live);
                }
                Ok(Err(source)) => {
                    tracing::warn!(resource = descriptor.name(), error = %source, "create failed");
                    self.state = WorkflowState::Failed;
                    return Err(WorkflowError::Provider {
                        phase: Phase::Apply,
                        resource: descriptor.name().to_owned(),
                        kind: Some(descriptor.kind()),
                        source,
                    });
                }
                Err(_) => {
                    tracing::warn!(resource = descriptor.name(), "create timed out");
                    self.state = WorkflowState::Failed;
                    return Err(WorkflowError::Timeout {
                        phase: Phase::Apply,
                        resource: descriptor.name().to_owned(),
                        timeout: self.settings.step_timeout,
                    });
                }
            }
        }

        self.state = WorkflowState::Ready;
        tracing::info!(group, created = self.live.len(), "plan applied");
        Ok(&self.live)
    }

    /// Stops, starts, or restarts the virtual machine named `target`.
    ///
    /// Waits for the provider to confirm, bounded by the lifecycle timeout.
    /// A provider error restores the previous state; a timeout leaves the
    /// machine in an unknown condition and moves the workflow to
    /// [`WorkflowState::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidState`] outside `Ready` (or `Stopped`
    /// for `Start`) without calling the provider,
    /// [`WorkflowError::UnknownTarget`] when `target` is not a created
    /// machine, and [`WorkflowError::Provider`] or [`WorkflowError::Timeout`]
    /// when the call fails.
    pub async fn lifecycle(&mut self, op: LifecycleOp, target: &str) -> WorkflowResult<(), P> {
        let phase = Phase::Lifecycle(op);
        let Some(plan) = self.plan.as_ref() else {
            return Err(WorkflowError::NotPlanned { operation: phase });
        };
        if !op.permits(self.state) {
            return Err(WorkflowError::InvalidState {
                operation: phase,
                state: self.state,
            });
        }
        if !self
            .live
            .iter()
            .any(|live| live.name == target && live.kind == Some(ResourceKind::VirtualMachine))
        {
            return Err(WorkflowError::UnknownTarget {
                target: target.to_owned(),
            });
        }

        let group = plan.target.group_name.as_str();
        let previous = self.state;
        self.state = op.transitional();
        tracing::info!(group, vm = target, op = %op, "lifecycle operation started");

        let call = match op {
            LifecycleOp::Stop => self.provider.power_off(group, target),
            LifecycleOp::Start => self.provider.start(group, target),
            LifecycleOp::Restart => self.provider.restart(group, target),
        };
        match timeout(self.settings.lifecycle_timeout, call).await {
            Ok(Ok(())) => {
                self.state = op.settled();
                tracing::info!(vm = target, state = %self.state, "lifecycle operation finished");
                Ok(())
            }
            Ok(Err(source)) => {
                self.state = previous;
                Err(WorkflowError::Provider {
                    phase,
                    resource: target.to_owned(),
                    kind: Some(ResourceKind::VirtualMachine),
                    source,
                })
            }
            Err(_) => {
                self.state = WorkflowState::Failed;
                Err(WorkflowError::Timeout {
                    phase,
                    resource: target.to_owned(),
                    timeout: self.settings.lifecycle_timeout,
                })
            }
        }
    }

    /// Lists every resource the provider reports in the planned group.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotPlanned`] before planning,
    /// [`WorkflowError::InvalidState`] once deleted, and
    /// [`WorkflowError::Provider`] when the call fails.
    pub async fn list_resources(&self) -> WorkflowResult<Vec<LiveResource>, P> {
        let group = self.readable_group(Phase::Inventory)?;
        self.provider
            .list_resources(group)
            .await
            .map_err(|source| group_failure(Phase::Inventory, group, source))
    }

    /// Exports the group's template covering every resource.
    ///
    /// # Errors
    ///
    /// See [`ProvisioningWorkflow::export_template_with`].
    pub async fn export_template(&self) -> WorkflowResult<String, P> {
        self.export_template_with(&TemplateExporter::default())
            .await
    }

    /// Exports the group's template using `exporter`. The state is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotPlanned`] before planning,
    /// [`WorkflowError::InvalidState`] once deleted, and
    /// [`WorkflowError::Provider`] when the call fails.
    pub async fn export_template_with(
        &self,
        exporter: &TemplateExporter,
    ) -> WorkflowResult<String, P> {
        let group = self.readable_group(Phase::Export)?;
        exporter
            .export(&self.provider, group)
            .await
            .map_err(|source| group_failure(Phase::Export, group, source))
    }

    /// Deletes the resource group, cascading to every resource in it.
    ///
    /// Once the workflow is [`WorkflowState::Deleted`] further calls return
    /// [`TeardownOutcome::AlreadyDeleted`] without calling the provider.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotPlanned`] before planning,
    /// [`WorkflowError::Teardown`] when the provider rejects the deletion,
    /// and [`WorkflowError::Timeout`] when it does not confirm in time. Both
    /// leave the workflow in [`WorkflowState::Deleting`] for a retry.
    pub async fn teardown(&mut self) -> WorkflowResult<TeardownOutcome, P> {
        let Some(plan) = self.plan.as_ref() else {
            return Err(WorkflowError::NotPlanned {
                operation: Phase::Teardown,
            });
        };
        if self.state == WorkflowState::Deleted {
            tracing::debug!("teardown already completed");
            return Ok(TeardownOutcome::AlreadyDeleted);
        }

        let group = plan.target.group_name.as_str();
        self.state = WorkflowState::Deleting;
        tracing::info!(group, "deleting resource group");

        match timeout(
            self.settings.teardown_timeout,
            self.provider.delete_group(group),
        )
        .await
        {
            Ok(Ok(())) => {
                self.live.clear();
                self.state = WorkflowState::Deleted;
                tracing::info!(group, "resource group deleted");
                Ok(TeardownOutcome::Deleted)
            }
            Ok(Err(source)) => {
                tracing::warn!(group, error = %source, "teardown failed");
                Err(WorkflowError::Teardown {
                    group: group.to_owned(),
                    source,
                })
            }
            Err(_) => Err(WorkflowError::Timeout {
                phase: Phase::Teardown,
                resource: group.to_owned(),
                timeout: self.settings.teardown_timeout,
            }),
        }
    }

    fn readable_group(&self, phase: Phase) -> WorkflowResult<&str, P> {
        let Some(plan) = self.plan.as_ref() else {
            return Err(WorkflowError::NotPlanned { operation: phase });
        };
        if self.state == WorkflowState::Deleted {
            return Err(WorkflowError::InvalidState {
                operation: phase,
                state: self.state,
            });
        }
        Ok(plan.target.group_name.as_str())
    }
}

fn group_failure<E: std::error::Error + 'static>(
    phase: Phase,
    group: &str,
    source: E,
) -> WorkflowError<E> {
    WorkflowError::Provider {
        phase,
        resource: group.to_owned(),
        kind: Some(ResourceKind::ResourceGroup),
        source,
    }
}

fn check_single_group(
    target: &DeploymentTarget,
    descriptors: &[ResourceDescriptor],
) -> Result<(), ValidationError> {
    let groups: Vec<&str> = descriptors
        .iter()
        .filter(|descriptor| descriptor.kind() == ResourceKind::ResourceGroup)
        .map(ResourceDescriptor::name)
        .collect();
    match groups.as_slice() {
        [only] if *only == target.group_name => Ok(()),
        [] | [_] => Err(ValidationError::MissingResourceGroup {
            group: target.group_name.clone(),
        }),
        many => Err(ValidationError::MultipleResourceGroups {
            groups: many.join(", "),
        }),
    }
}
