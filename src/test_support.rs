//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedProvider`] stands in for the management API: it records every
//! call, keeps an in-memory view of the group, and fails or stalls on
//! request. The CLI also drives it when `ARMFLOW_FAKE_PROVIDER` is set.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::descriptor::{ResourceDescriptor, ResourceKind, properties_to_json};
use crate::provider::{LiveResource, PowerAction, ProviderClient, ProviderFuture};
use crate::template::ResourceFilter;

/// Call recorded by [`ScriptedProvider`].
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderCall {
    /// `create_or_update` for the named resource.
    CreateOrUpdate {
        /// Owning group.
        group: String,
        /// Resource name.
        name: String,
        /// Resource kind.
        kind: ResourceKind,
        /// Properties as received, references already resolved.
        properties: Value,
    },
    /// `delete_group`.
    DeleteGroup(String),
    /// `list_resources`.
    ListResources(String),
    /// A power action against a machine.
    Power {
        /// Action requested.
        action: PowerAction,
        /// Machine name.
        vm: String,
    },
    /// `export_template` with the rendered resource filter.
    ExportTemplate {
        /// Owning group.
        group: String,
        /// Filter as sent to the management API.
        resources: Vec<String>,
    },
}

/// Failures produced by [`ScriptedProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedProviderError {
    /// Scripted creation failure.
    #[error("scripted failure creating {0}")]
    Create(String),
    /// Scripted group deletion failure.
    #[error("scripted failure deleting group {0}")]
    Delete(String),
    /// Scripted power action failure.
    #[error("scripted failure running {action} on {vm}")]
    Power {
        /// Action that failed.
        action: PowerAction,
        /// Target machine.
        vm: String,
    },
    /// Scripted inventory or export failure.
    #[error("scripted failure reading group {0}")]
    Read(String),
}

#[derive(Debug, Default)]
struct ScriptState {
    calls: Vec<ProviderCall>,
    live: Vec<LiveResource>,
    fail_create: BTreeSet<String>,
    fail_power: BTreeSet<&'static str>,
    delete_failures: u32,
    fail_reads: bool,
    create_delay: Option<Duration>,
    power_delay: Option<Duration>,
}

/// In-memory provider with scripted failures.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    state: Arc<StdMutex<ScriptState>>,
}

impl ScriptedProvider {
    /// Creates a provider where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StdMutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes creation of `name` fail.
    pub fn fail_create(&self, name: &str) {
        self.lock().fail_create.insert(name.to_owned());
    }

    /// Makes the next `times` group deletions fail.
    pub fn fail_delete(&self, times: u32) {
        self.lock().delete_failures = times;
    }

    /// Makes `action` fail every time it is requested.
    pub fn fail_power(&self, action: PowerAction) {
        self.lock().fail_power.insert(action.as_str());
    }

    /// Makes inventory and export calls fail.
    pub fn fail_reads(&self) {
        self.lock().fail_reads = true;
    }

    /// Delays every creation by `delay`.
    pub fn delay_create(&self, delay: Duration) {
        self.lock().create_delay = Some(delay);
    }

    /// Delays every power action by `delay`.
    pub fn delay_power(&self, delay: Duration) {
        self.lock().power_delay = Some(delay);
    }

    /// Snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Names passed to `create_or_update`, in call order.
    #[must_use]
    pub fn created_names(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::CreateOrUpdate { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `delete_group` calls.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, ProviderCall::DeleteGroup(_)))
            .count()
    }

    /// Power actions requested, in call order.
    #[must_use]
    pub fn power_actions(&self) -> Vec<PowerAction> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Power { action, .. } => Some(*action),
                _ => None,
            })
            .collect()
    }

    /// Properties received for `name` by its most recent creation call.
    #[must_use]
    pub fn created_properties(&self, name: &str) -> Option<Value> {
        self.lock().calls.iter().rev().find_map(|call| match call {
            ProviderCall::CreateOrUpdate {
                name: created,
                properties,
                ..
            } if created == name => Some(properties.clone()),
            _ => None,
        })
    }

    fn power<'a>(
        &'a self,
        action: PowerAction,
        vm: &'a str,
    ) -> ProviderFuture<'a, (), ScriptedProviderError> {
        Box::pin(async move {
            let delay = {
                let mut state = self.lock();
                state.calls.push(ProviderCall::Power {
                    action,
                    vm: vm.to_owned(),
                });
                if state.fail_power.contains(action.as_str()) {
                    return Err(ScriptedProviderError::Power {
                        action,
                        vm: vm.to_owned(),
                    });
                }
                state.power_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        })
    }
}

/// Provider id the scripted provider assigns to `name`.
#[must_use]
pub fn scripted_id(name: &str) -> String {
    format!("{name}-id")
}

impl ProviderClient for ScriptedProvider {
    type Error = ScriptedProviderError;

    fn create_or_update<'a>(
        &'a self,
        group: &'a str,
        descriptor: &'a ResourceDescriptor,
    ) -> ProviderFuture<'a, LiveResource, Self::Error> {
        Box::pin(async move {
            let properties = Value::Object(properties_to_json(descriptor.properties()));
            let delay = {
                let mut state = self.lock();
                state.calls.push(ProviderCall::CreateOrUpdate {
                    group: group.to_owned(),
                    name: descriptor.name().to_owned(),
                    kind: descriptor.kind(),
                    properties: properties.clone(),
                });
                if state.fail_create.contains(descriptor.name()) {
                    return Err(ScriptedProviderError::Create(descriptor.name().to_owned()));
                }
                state.create_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let live = LiveResource {
                id: scripted_id(descriptor.name()),
                name: descriptor.name().to_owned(),
                kind: Some(descriptor.kind()),
                resource_type: descriptor.kind().to_string(),
                properties,
            };
            let mut state = self.lock();
            state.live.retain(|existing| existing.name != live.name);
            state.live.push(live.clone());
            Ok(live)
        })
    }

    fn delete_group<'a>(&'a self, group: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ProviderCall::DeleteGroup(group.to_owned()));
            if state.delete_failures > 0 {
                state.delete_failures -= 1;
                return Err(ScriptedProviderError::Delete(group.to_owned()));
            }
            state.live.clear();
            Ok(())
        })
    }

    fn list_resources<'a>(
        &'a self,
        group: &'a str,
    ) -> ProviderFuture<'a, Vec<LiveResource>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .calls
                .push(ProviderCall::ListResources(group.to_owned()));
            if state.fail_reads {
                return Err(ScriptedProviderError::Read(group.to_owned()));
            }
            Ok(state
                .live
                .iter()
                .filter(|live| live.kind != Some(ResourceKind::ResourceGroup))
                .cloned()
                .collect())
        })
    }

    fn power_off<'a>(
        &'a self,
        _group: &'a str,
        vm: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        self.power(PowerAction::PowerOff, vm)
    }

    fn start<'a>(&'a self, _group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        self.power(PowerAction::Start, vm)
    }

    fn restart<'a>(&'a self, _group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        self.power(PowerAction::Restart, vm)
    }

    fn export_template<'a>(
        &'a self,
        group: &'a str,
        filter: &'a ResourceFilter,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ProviderCall::ExportTemplate {
                group: group.to_owned(),
                resources: filter.to_resource_list(),
            });
            if state.fail_reads {
                return Err(ScriptedProviderError::Read(group.to_owned()));
            }
            let resources: Vec<Value> = state
                .live
                .iter()
                .filter(|live| live.kind != Some(ResourceKind::ResourceGroup))
                .map(|live| json!({ "type": live.resource_type, "name": live.name }))
                .collect();
            Ok(json!({ "contentVersion": "1.0.0.0", "resources": resources }).to_string())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets one environment variable while holding a global mutex.
    pub async fn set_var(key: &str, value: &str) -> Self {
        Self::set_vars(&[(key, value)]).await
    }

    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes environment variables while holding a global mutex.
    pub async fn remove_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
