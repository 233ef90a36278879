//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeProvider`] simulates the provider's asynchronous action model,
//! listing lag, and failing destroy calls. [`ScriptedRunner`] replays
//! pre-seeded command outputs, optionally routed by host, so remote scans
//! can be driven without `ssh`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::exec::{CommandFuture, CommandOutput, CommandRunner, ExecError};
use crate::provider::{
    Action, ActionStatus, CreatedInstance, Instance, InstanceSpec, KeyResource, Provider,
    ProviderFuture, Snapshot,
};
use crate::scan::{InstallerError, InstallerFuture, InstallerSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs.
///
/// Outputs pushed with [`ScriptedRunner::push_routed`] are returned to the
/// first invocation whose command line contains the route pattern. Other
/// invocations consume the FIFO queue and then the default response.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<CommandOutput>,
    routed: Vec<(String, VecDeque<CommandOutput>)>,
    fallback: Option<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Bytes fed to the program's stdin, if any.
    pub stdin: Option<Vec<u8>>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Builds a [`CommandOutput`] with the given exit code and streams.
#[must_use]
pub fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: stdout.to_owned(),
        stderr: stderr.to_owned(),
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Returns the invocations whose command line contains `pattern`.
    #[must_use]
    pub fn invocations_matching(&self, pattern: &str) -> Vec<CommandInvocation> {
        self.invocations()
            .into_iter()
            .filter(|call| call.command_string().contains(pattern))
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(output(0, "", ""));
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(output(code, "", "simulated failure"));
    }

    /// Pushes an explicit command output.
    pub fn push_output(&self, response: CommandOutput) {
        lock(&self.state).responses.push_back(response);
    }

    /// Queues `response` for the next invocation whose command line contains
    /// `pattern`.
    pub fn push_routed(&self, pattern: &str, response: CommandOutput) {
        let mut state = lock(&self.state);
        if let Some((_, queue)) = state
            .routed
            .iter_mut()
            .find(|(route, _)| route == pattern)
        {
            queue.push_back(response);
        } else {
            state
                .routed
                .push((pattern.to_owned(), VecDeque::from([response])));
        }
    }

    /// Sets the response returned once every queue is exhausted.
    pub fn respond_by_default(&self, response: CommandOutput) {
        lock(&self.state).fallback = Some(response);
    }

    fn next_response(state: &mut RunnerState, command: &str) -> Option<CommandOutput> {
        let routed = state
            .routed
            .iter_mut()
            .filter(|(pattern, _)| command.contains(pattern.as_str()))
            .find_map(|(_, queue)| queue.pop_front());
        routed
            .or_else(|| state.responses.pop_front())
            .or_else(|| state.fallback.clone())
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        stdin: Option<&'a [u8]>,
    ) -> CommandFuture<'a> {
        let invocation = CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            stdin: stdin.map(<[u8]>::to_vec),
        };
        let command = invocation.command_string();
        let mut state = lock(&self.state);
        state.invocations.push(invocation);
        let response = Self::next_response(&mut state, &command).ok_or_else(|| ExecError::Spawn {
            program: program.to_owned(),
            message: String::from("no scripted response available"),
        });
        drop(state);
        Box::pin(async move { response })
    }
}

/// Installer double that returns a fixed script or a fixed failure.
#[derive(Clone, Debug)]
pub struct StaticInstaller {
    script: Result<String, InstallerError>,
}

impl StaticInstaller {
    /// Serves `script` on every fetch.
    #[must_use]
    pub fn serving(script: &str) -> Self {
        Self {
            script: Ok(script.to_owned()),
        }
    }

    /// Fails every fetch with an HTTP status error.
    #[must_use]
    pub fn failing(status: u16) -> Self {
        Self {
            script: Err(InstallerError::Status {
                url: String::from("https://installer.invalid/install.sh"),
                status,
            }),
        }
    }
}

impl InstallerSource for StaticInstaller {
    fn fetch(&self) -> InstallerFuture<'_> {
        let script = self.script.clone();
        Box::pin(async move { script })
    }
}

/// Sequence of statuses an action reports when reloaded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ActionScript {
    in_progress_reloads: u32,
    outcome: Option<ActionStatus>,
}

impl ActionScript {
    /// Reports in progress for `reloads` reloads, then completed.
    #[must_use]
    pub const fn complete_after(reloads: u32) -> Self {
        Self {
            in_progress_reloads: reloads,
            outcome: Some(ActionStatus::Completed),
        }
    }

    /// Reports in progress for `reloads` reloads, then errored.
    #[must_use]
    pub const fn error_after(reloads: u32) -> Self {
        Self {
            in_progress_reloads: reloads,
            outcome: Some(ActionStatus::Errored),
        }
    }

    /// Never leaves the in-progress state.
    #[must_use]
    pub const fn never_finish() -> Self {
        Self {
            in_progress_reloads: 0,
            outcome: None,
        }
    }

    const fn status_at(self, reload: u32) -> ActionStatus {
        match self.outcome {
            Some(status) if reload > self.in_progress_reloads => status,
            _ => ActionStatus::InProgress,
        }
    }
}

impl Default for ActionScript {
    fn default() -> Self {
        Self::complete_after(0)
    }
}

/// Number of calls made to each [`FakeProvider`] operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProviderCalls {
    /// `list_instances` calls.
    pub list_instances: u32,
    /// `get_instance` calls.
    pub get_instance: u32,
    /// `create_snapshot` calls.
    pub create_snapshot: u32,
    /// `list_snapshots` calls.
    pub list_snapshots: u32,
    /// `destroy_snapshot` calls.
    pub destroy_snapshot: u32,
    /// `create_instance` calls.
    pub create_instance: u32,
    /// `destroy_instance` calls.
    pub destroy_instance: u32,
    /// `create_key` calls.
    pub create_key: u32,
    /// `list_keys` calls.
    pub list_keys: u32,
    /// `destroy_key` calls.
    pub destroy_key: u32,
    /// `get_action` calls.
    pub get_action: u32,
}

/// Errors returned by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeProviderError {
    /// A failure injected by the test.
    #[error("simulated {0} failure")]
    Injected(&'static str),
    /// The referenced resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Resource identifier.
        id: String,
    },
}

#[derive(Debug)]
enum ActionEffect {
    MaterialiseSnapshot(Snapshot),
    ActivateInstance(u64),
    Nothing,
}

#[derive(Debug)]
struct ScriptedAction {
    kind: &'static str,
    script: ActionScript,
    reloads: u32,
    effect: ActionEffect,
}

#[derive(Debug)]
struct ListedSnapshot {
    snapshot: Snapshot,
    hidden_for: u32,
}

#[derive(Debug, Default)]
struct ProviderState {
    next_id: u64,
    instances: BTreeMap<u64, Instance>,
    snapshots: Vec<ListedSnapshot>,
    keys: Vec<KeyResource>,
    public_keys: HashMap<u64, String>,
    actions: HashMap<u64, ScriptedAction>,
    snapshot_scripts: HashMap<u64, ActionScript>,
    next_snapshot_scripts: VecDeque<ActionScript>,
    next_create_scripts: VecDeque<ActionScript>,
    snapshot_listing_lag: u32,
    materialise_immediately: bool,
    pinned_addresses: HashMap<String, IpAddr>,
    failing_snapshot_requests: BTreeSet<u64>,
    fail_instance_creation: bool,
    fail_instance_destroy: bool,
    fail_snapshot_destroy: bool,
    fail_key_creation: bool,
    fail_key_destroy: bool,
    destroy_latency: Duration,
    created_specs: Vec<InstanceSpec>,
    destroyed_instances: Vec<u64>,
    destroyed_snapshots: Vec<String>,
    calls: ProviderCalls,
}

impl ProviderState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn apply(&mut self, effect: ActionEffect) {
        match effect {
            ActionEffect::MaterialiseSnapshot(snapshot) => {
                let hidden_for = self.snapshot_listing_lag;
                self.snapshots.push(ListedSnapshot {
                    snapshot,
                    hidden_for,
                });
            }
            ActionEffect::ActivateInstance(id) => {
                if let Some(instance) = self.instances.get_mut(&id) {
                    instance.status = String::from("active");
                    let octet = u8::try_from(id.rem_euclid(250)).unwrap_or(1);
                    let address = self
                        .pinned_addresses
                        .get(&instance.name)
                        .copied()
                        .unwrap_or(IpAddr::V4(Ipv4Addr::new(203, 0, 113, octet)));
                    instance.public_ip = Some(address);
                }
            }
            ActionEffect::Nothing => {}
        }
    }
}

/// In-memory provider that simulates asynchronous provider actions.
///
/// Snapshots become listable when their action completes (or immediately,
/// see [`FakeProvider::materialise_snapshots_immediately`]). Scan instances
/// gain a `203.0.113.x` address when their create action completes.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

/// Builds an active source instance in `nyc3` with a documentation address.
#[must_use]
pub fn source_instance(id: u64, name: &str) -> Instance {
    let octet = u8::try_from(id.rem_euclid(250)).unwrap_or(1);
    Instance {
        id,
        name: name.to_owned(),
        region: String::from("nyc3"),
        size: String::from("s-1vcpu-1gb"),
        disk_gb: 25,
        status: String::from("active"),
        public_ip: Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, octet))),
        tags: Vec::new(),
    }
}

impl FakeProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProviderState> {
        lock(&self.state)
    }

    /// Adds an instance to the account and returns it.
    pub fn add_instance(&self, instance: Instance) -> Instance {
        self.state().instances.insert(instance.id, instance.clone());
        instance
    }

    /// Adds a snapshot that is immediately listable.
    pub fn add_snapshot(&self, snapshot: Snapshot) {
        self.state().snapshots.push(ListedSnapshot {
            snapshot,
            hidden_for: 0,
        });
    }

    /// Registers a key directly and returns it.
    pub fn add_key(&self, name: &str) -> KeyResource {
        let mut state = self.state();
        let id = state.allocate_id();
        let key = KeyResource {
            id,
            name: name.to_owned(),
            fingerprint: format!("fp:{id}"),
        };
        state.keys.push(key.clone());
        key
    }

    /// Scripts the status sequence of action `id`.
    pub fn script_action(&self, id: u64, script: ActionScript) {
        self.state().actions.insert(
            id,
            ScriptedAction {
                kind: "scripted",
                script,
                reloads: 0,
                effect: ActionEffect::Nothing,
            },
        );
    }

    /// Scripts the next snapshot action not covered by
    /// [`FakeProvider::script_snapshot_of`].
    pub fn script_next_snapshot(&self, script: ActionScript) {
        self.state().next_snapshot_scripts.push_back(script);
    }

    /// Scripts every snapshot action taken of instance `source_id`.
    pub fn script_snapshot_of(&self, source_id: u64, script: ActionScript) {
        self.state().snapshot_scripts.insert(source_id, script);
    }

    /// Rejects snapshot requests for instance `source_id`.
    pub fn reject_snapshot_of(&self, source_id: u64) {
        self.state().failing_snapshot_requests.insert(source_id);
    }

    /// Scripts the next instance creation action.
    pub fn script_next_create(&self, script: ActionScript) {
        self.state().next_create_scripts.push_back(script);
    }

    /// Hides newly created snapshots from the next `calls` listings.
    pub fn set_snapshot_listing_lag(&self, calls: u32) {
        self.state().snapshot_listing_lag = calls;
    }

    /// Lists snapshots as soon as they are requested, before the action
    /// completes.
    pub fn materialise_snapshots_immediately(&self) {
        self.state().materialise_immediately = true;
    }

    /// Assigns `address` to the instance named `name` once it is active.
    pub fn pin_address(&self, name: &str, address: IpAddr) {
        self.state()
            .pinned_addresses
            .insert(name.to_owned(), address);
    }

    /// Rejects every instance creation request.
    pub fn fail_instance_creation(&self) {
        self.state().fail_instance_creation = true;
    }

    /// Fails every instance destroy call.
    pub fn fail_instance_destroy(&self) {
        self.state().fail_instance_destroy = true;
    }

    /// Delays every instance destroy call by `latency` before it takes
    /// effect. The call is counted as soon as it is made.
    pub fn set_destroy_latency(&self, latency: Duration) {
        self.state().destroy_latency = latency;
    }

    /// Resolves once at least `count` instance destroy calls have been made.
    pub async fn instance_destroys_started(&self, count: u32) {
        while self.calls().destroy_instance < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn finish_instance_destroy(&self, id: u64) -> Result<(), FakeProviderError> {
        let mut state = self.state();
        if state.fail_instance_destroy {
            Err(FakeProviderError::Injected("instance destroy"))
        } else if state.instances.remove(&id).is_some() {
            state.destroyed_instances.push(id);
            Ok(())
        } else {
            Err(FakeProviderError::NotFound {
                kind: "instance",
                id: id.to_string(),
            })
        }
    }

    /// Fails every snapshot destroy call.
    pub fn fail_snapshot_destroy(&self) {
        self.state().fail_snapshot_destroy = true;
    }

    /// Rejects every key registration.
    pub fn fail_key_creation(&self) {
        self.state().fail_key_creation = true;
    }

    /// Fails every key destroy call.
    pub fn fail_key_destroy(&self) {
        self.state().fail_key_destroy = true;
    }

    /// Returns the call counters.
    #[must_use]
    pub fn calls(&self) -> ProviderCalls {
        self.state().calls
    }

    /// Returns the registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<KeyResource> {
        self.state().keys.clone()
    }

    /// Returns the public key text registered under key `id`.
    #[must_use]
    pub fn registered_public_key(&self, id: u64) -> Option<String> {
        self.state().public_keys.get(&id).cloned()
    }

    /// Returns every instance currently in the account.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        self.state().instances.values().cloned().collect()
    }

    /// Returns every snapshot currently in the account, hidden or not.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state()
            .snapshots
            .iter()
            .map(|listed| listed.snapshot.clone())
            .collect()
    }

    /// Returns the instance requests received, in order.
    #[must_use]
    pub fn created_specs(&self) -> Vec<InstanceSpec> {
        self.state().created_specs.clone()
    }

    /// Returns the identifiers of destroyed instances, in order.
    #[must_use]
    pub fn destroyed_instances(&self) -> Vec<u64> {
        self.state().destroyed_instances.clone()
    }

    /// Returns the identifiers of destroyed snapshots, in order.
    #[must_use]
    pub fn destroyed_snapshots(&self) -> Vec<String> {
        self.state().destroyed_snapshots.clone()
    }
}

fn in_progress(id: u64, kind: &str) -> Action {
    Action {
        id,
        kind: kind.to_owned(),
        status: ActionStatus::InProgress,
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error> {
        let mut state = self.state();
        state.calls.list_instances += 1;
        let instances = state.instances.values().cloned().collect();
        drop(state);
        Box::pin(async move { Ok(instances) })
    }

    fn get_instance(&self, id: u64) -> ProviderFuture<'_, Option<Instance>, Self::Error> {
        let mut state = self.state();
        state.calls.get_instance += 1;
        let found = state.instances.get(&id).cloned();
        drop(state);
        Box::pin(async move { Ok(found) })
    }

    fn create_snapshot<'a>(
        &'a self,
        instance_id: u64,
        name: &'a str,
    ) -> ProviderFuture<'a, Action, Self::Error> {
        let mut state = self.state();
        state.calls.create_snapshot += 1;
        let result = if state.failing_snapshot_requests.contains(&instance_id) {
            Err(FakeProviderError::Injected("snapshot request"))
        } else if let Some(source) = state.instances.get(&instance_id).cloned() {
            let script = match state.snapshot_scripts.get(&instance_id) {
                Some(script) => *script,
                None => state.next_snapshot_scripts.pop_front().unwrap_or_default(),
            };
            let snapshot_id = state.allocate_id();
            let action_id = state.allocate_id();
            let snapshot = Snapshot {
                id: snapshot_id.to_string(),
                name: name.to_owned(),
                regions: vec![source.region],
            };
            let effect = if state.materialise_immediately {
                state.apply(ActionEffect::MaterialiseSnapshot(snapshot));
                ActionEffect::Nothing
            } else {
                ActionEffect::MaterialiseSnapshot(snapshot)
            };
            state.actions.insert(
                action_id,
                ScriptedAction {
                    kind: "snapshot",
                    script,
                    reloads: 0,
                    effect,
                },
            );
            Ok(in_progress(action_id, "snapshot"))
        } else {
            Err(FakeProviderError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn list_snapshots(&self) -> ProviderFuture<'_, Vec<Snapshot>, Self::Error> {
        let mut state = self.state();
        state.calls.list_snapshots += 1;
        let mut visible = Vec::new();
        for listed in &mut state.snapshots {
            if listed.hidden_for == 0 {
                visible.push(listed.snapshot.clone());
            } else {
                listed.hidden_for -= 1;
            }
        }
        drop(state);
        Box::pin(async move { Ok(visible) })
    }

    fn destroy_snapshot<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        let mut state = self.state();
        state.calls.destroy_snapshot += 1;
        let result = if state.fail_snapshot_destroy {
            Err(FakeProviderError::Injected("snapshot destroy"))
        } else if let Some(position) = state
            .snapshots
            .iter()
            .position(|listed| listed.snapshot.id == id)
        {
            state.snapshots.remove(position);
            state.destroyed_snapshots.push(id.to_owned());
            Ok(())
        } else {
            Err(FakeProviderError::NotFound {
                kind: "snapshot",
                id: id.to_owned(),
            })
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, CreatedInstance, Self::Error> {
        let mut state = self.state();
        state.calls.create_instance += 1;
        let result = if state.fail_instance_creation {
            Err(FakeProviderError::Injected("instance creation"))
        } else {
            state.created_specs.push(spec.clone());
            let script = state.next_create_scripts.pop_front().unwrap_or_default();
            let instance_id = state.allocate_id();
            let action_id = state.allocate_id();
            let instance = Instance {
                id: instance_id,
                name: spec.name.clone(),
                region: spec.region.clone(),
                size: spec.size.clone(),
                disk_gb: 80,
                status: String::from("new"),
                public_ip: None,
                tags: spec.tags.clone(),
            };
            state.instances.insert(instance_id, instance.clone());
            state.actions.insert(
                action_id,
                ScriptedAction {
                    kind: "create",
                    script,
                    reloads: 0,
                    effect: ActionEffect::ActivateInstance(instance_id),
                },
            );
            Ok(CreatedInstance {
                instance,
                action: in_progress(action_id, "create"),
            })
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn destroy_instance(&self, id: u64) -> ProviderFuture<'_, (), Self::Error> {
        let latency = {
            let mut state = self.state();
            state.calls.destroy_instance += 1;
            state.destroy_latency
        };
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            self.finish_instance_destroy(id)
        })
    }

    fn create_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, KeyResource, Self::Error> {
        let mut state = self.state();
        state.calls.create_key += 1;
        let result = if state.fail_key_creation {
            Err(FakeProviderError::Injected("key registration"))
        } else {
            let id = state.allocate_id();
            let key = KeyResource {
                id,
                name: name.to_owned(),
                fingerprint: format!("fp:{id}"),
            };
            state.keys.push(key.clone());
            state.public_keys.insert(id, public_key.to_owned());
            Ok(key)
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn list_keys(&self) -> ProviderFuture<'_, Vec<KeyResource>, Self::Error> {
        let mut state = self.state();
        state.calls.list_keys += 1;
        let keys = state.keys.clone();
        drop(state);
        Box::pin(async move { Ok(keys) })
    }

    fn destroy_key(&self, id: u64) -> ProviderFuture<'_, (), Self::Error> {
        let mut state = self.state();
        state.calls.destroy_key += 1;
        let result = if state.fail_key_destroy {
            Err(FakeProviderError::Injected("key destroy"))
        } else if let Some(position) = state.keys.iter().position(|key| key.id == id) {
            state.keys.remove(position);
            state.public_keys.remove(&id);
            Ok(())
        } else {
            Err(FakeProviderError::NotFound {
                kind: "key",
                id: id.to_string(),
            })
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn get_action(&self, id: u64) -> ProviderFuture<'_, Action, Self::Error> {
        let mut state = self.state();
        state.calls.get_action += 1;
        let reloaded = state.actions.get_mut(&id).map(|action| {
            action.reloads += 1;
            let status = action.script.status_at(action.reloads);
            let effect = if status == ActionStatus::Completed {
                std::mem::replace(&mut action.effect, ActionEffect::Nothing)
            } else {
                ActionEffect::Nothing
            };
            (action.kind, status, effect)
        });
        let result = match reloaded {
            Some((kind, status, effect)) => {
                state.apply(effect);
                Ok(Action {
                    id,
                    kind: kind.to_owned(),
                    status,
                })
            }
            None => Err(FakeProviderError::NotFound {
                kind: "action",
                id: id.to_string(),
            }),
        };
        drop(state);
        Box::pin(async move { result })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::apply(pairs, &[]).await
    }

    /// Sets `pairs` and removes `removed` while holding a global mutex.
    pub async fn apply(pairs: &[(&str, &str)], removed: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| *key)
                    .chain(removed.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + removed.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in removed {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
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
