//! Authorization gate over a hot-reloaded policy file.
//!
//! The gate looks for `security.splx` in the security folder. No file means
//! no security: every check allows. Once loaded, the file's modification
//! stamp is polled and a changed file is parsed into a fresh policy that
//! replaces the old one in a single pointer swap, so a check sees either the
//! old policy or the new one, never a mix. A file that fails to load leaves
//! the previous policy in force.

pub mod acl;

pub use acl::{AclPolicy, AclPolicyLoader};

use crate::error::{Result, VaultError};
use crate::paths::SECURITY_FILE;
use crate::resolver::PathResolver;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Identity / Right
// ---------------------------------------------------------------------------

/// Who is asking. Group membership comes from the caller's identity
/// provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RightKind {
    #[default]
    FileSystem,
    Synapse,
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Right {
    pub kind: RightKind,
    pub name: String,
}

impl Right {
    pub fn new(kind: RightKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// The right checked when none is given.
    pub fn execute() -> Self {
        Self::new(RightKind::FileSystem, "Execute")
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Policy capability
// ---------------------------------------------------------------------------

/// A loaded, immutable authorization policy.
pub trait Policy: Send + Sync {
    fn evaluate(&self, identity: &Identity, resource: &str, right: &Right) -> Result<bool>;
}

/// Builds a [`Policy`] from the raw security file.
pub trait PolicyLoader: Send + Sync {
    fn load(&self, data: &str, global_groups: &[String]) -> Result<Arc<dyn Policy>>;
}

// ---------------------------------------------------------------------------
// SecurityGate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No security file in the folder.
    Absent,
    Unchanged,
    Reloaded,
}

struct LoadedPolicy {
    policy: Arc<dyn Policy>,
    key: String,
    last_modified: DateTime<Utc>,
}

pub struct SecurityGate {
    resolver: PathResolver,
    folder: String,
    loader: Arc<dyn PolicyLoader>,
    global_groups: Vec<String>,
    current: RwLock<Option<Arc<LoadedPolicy>>>,
    /// Stamp of a file version that failed to load; not retried until it
    /// changes again.
    rejected: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl SecurityGate {
    /// An unloaded gate. Nothing is read until [`refresh`](Self::refresh).
    pub fn new(
        resolver: PathResolver,
        folder: impl Into<String>,
        loader: Arc<dyn PolicyLoader>,
        global_groups: Vec<String>,
    ) -> Self {
        Self {
            resolver,
            folder: folder.into(),
            loader,
            global_groups,
            current: RwLock::new(None),
            rejected: Mutex::new(None),
        }
    }

    /// Build the gate and perform the first load.
    ///
    /// With `required`, a missing security file is a `Configuration` error.
    /// Load errors on this first pass propagate.
    pub fn open(
        resolver: PathResolver,
        folder: impl Into<String>,
        loader: Arc<dyn PolicyLoader>,
        global_groups: Vec<String>,
        required: bool,
    ) -> Result<Self> {
        let gate = Self::new(resolver, folder, loader, global_groups);
        gate.load_initial()?;
        if required && !gate.is_loaded() {
            return Err(VaultError::Configuration(format!(
                "security is required; could not load {SECURITY_FILE} from {}",
                gate.folder
            )));
        }
        Ok(gate)
    }

    fn load_initial(&self) -> Result<()> {
        let key = self.resolver.find_file(&self.folder, SECURITY_FILE, false)?;
        let Some(key) = key else {
            debug!(folder = %self.folder, "no security file; access checks allow");
            return Ok(());
        };
        let stamp = self.resolver.store().last_modified(&key)?;
        self.install(key, stamp)
    }

    fn snapshot(&self) -> Option<Arc<LoadedPolicy>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, key: String, stamp: DateTime<Utc>) -> Result<()> {
        let text = self.resolver.store().read_text(&key)?;
        let policy = self.loader.load(&text, &self.global_groups)?;
        let loaded = Arc::new(LoadedPolicy {
            policy,
            key,
            last_modified: stamp,
        });
        info!(key = %loaded.key, last_modified = %stamp, "security policy loaded");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(loaded);
        Ok(())
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Modification stamp of the policy in force.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.snapshot().map(|p| p.last_modified)
    }

    /// One poll tick: reload the policy if the file's stamp moved.
    ///
    /// A vanished file keeps the current policy. A version that fails to load
    /// is remembered and skipped until the file changes again; the error is
    /// returned once.
    pub fn refresh(&self) -> Result<RefreshOutcome> {
        let Some(key) = self.resolver.find_file(&self.folder, SECURITY_FILE, false)? else {
            return Ok(RefreshOutcome::Absent);
        };
        let stamp = self.resolver.store().last_modified(&key)?;

        if let Some(current) = self.snapshot() {
            if current.key == key && current.last_modified == stamp {
                return Ok(RefreshOutcome::Unchanged);
            }
        }
        {
            let rejected = self.rejected.lock().unwrap_or_else(PoisonError::into_inner);
            if rejected.as_ref() == Some(&(key.clone(), stamp)) {
                return Ok(RefreshOutcome::Unchanged);
            }
        }

        match self.install(key.clone(), stamp) {
            Ok(()) => Ok(RefreshOutcome::Reloaded),
            Err(e) => {
                *self.rejected.lock().unwrap_or_else(PoisonError::into_inner) = Some((key, stamp));
                Err(e)
            }
        }
    }

    /// Evaluate against the policy in force; `Ok(true)` when none is loaded.
    pub fn check(&self, identity: &Identity, resource: &str, right: &Right) -> Result<bool> {
        match self.snapshot() {
            Some(loaded) => loaded.policy.evaluate(identity, resource, right),
            None => Ok(true),
        }
    }

    /// Allow/deny shortcut. Any evaluation error counts as deny.
    pub fn authorize(&self, identity: &Identity, resource: &str, right: &Right) -> bool {
        match self.check(identity, resource, right) {
            Ok(allowed) => allowed,
            Err(e) => {
                debug!(identity = %identity.name, resource = %resource, error = %e, "access check errored; denying");
                false
            }
        }
    }

    /// Fail with `AccessDenied` on refusal. A no-op when nothing is loaded.
    pub fn authorize_or_fail(&self, identity: &Identity, resource: &str, right: &Right) -> Result<()> {
        if self.check(identity, resource, right)? {
            Ok(())
        } else {
            Err(VaultError::AccessDenied {
                identity: identity.name.clone(),
                resource: resource.to_string(),
                right: right.to_string(),
            })
        }
    }

    /// Poll [`refresh`](Self::refresh) every `every` on the current Tokio
    /// runtime. Ticks never overlap and errors are logged, not raised.
    ///
    /// Returns `None` outside a runtime or for a zero period. The task
    /// holds only a weak reference and stops once the gate is dropped.
    pub fn spawn_poller(self: &Arc<Self>, every: Duration) -> Option<PollerHandle> {
        if every.is_zero() {
            return None;
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let gate = Arc::downgrade(self);
        let task = handle.spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(gate) = gate.upgrade() else {
                    break;
                };
                match tokio::task::spawn_blocking(move || gate.refresh()).await {
                    Ok(Ok(RefreshOutcome::Reloaded)) => debug!("security poll reloaded policy"),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "security poll failed; keeping current policy"),
                    Err(e) => warn!(error = %e, "security poll task failed"),
                }
            }
        });
        Some(PollerHandle { task })
    }
}

/// Cancels the poller when cancelled or dropped.
#[derive(Debug)]
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectStore};

    const FOLDER: &str = "bucket/Security";
    const KEY: &str = "bucket/Security/security.splx";

    const ALLOW_OPS: &str = "Aces:\n  - Trustee: ops\n    Rights: [Execute]\n";
    const DENY_ALL: &str = "Aces: []\n";

    fn gate_over(mem: &Arc<MemoryStore>, required: bool) -> Result<SecurityGate> {
        SecurityGate::open(
            PathResolver::new(mem.clone()),
            FOLDER,
            Arc::new(AclPolicyLoader),
            vec!["Everyone".into()],
            required,
        )
    }

    fn ops() -> Identity {
        Identity::new("ops")
    }

    #[test]
    fn no_file_allows_everything() {
        let mem = Arc::new(MemoryStore::new());
        let gate = gate_over(&mem, false).unwrap();
        assert!(!gate.is_loaded());
        assert!(gate.authorize(&Identity::new("anyone"), "plan", &Right::execute()));
        gate.authorize_or_fail(&Identity::new("anyone"), "plan", &Right::execute())
            .unwrap();
        assert_eq!(gate.refresh().unwrap(), RefreshOutcome::Absent);
    }

    #[test]
    fn required_without_file_fails_configuration() {
        let mem = Arc::new(MemoryStore::new());
        assert!(matches!(
            gate_over(&mem, true),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn file_found_case_insensitively() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text("bucket/Security/Security.SPLX", ALLOW_OPS).unwrap();
        let gate = gate_over(&mem, true).unwrap();
        assert!(gate.is_loaded());
        assert!(gate.authorize(&ops(), "plan", &Right::execute()));
        assert!(!gate.authorize(&Identity::new("eve"), "plan", &Right::execute()));
    }

    #[test]
    fn or_fail_raises_access_denied() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text(KEY, ALLOW_OPS).unwrap();
        let gate = gate_over(&mem, false).unwrap();
        match gate.authorize_or_fail(&Identity::new("eve"), "deploy", &Right::execute()) {
            Err(VaultError::AccessDenied { identity, resource, right }) => {
                assert_eq!(identity, "eve");
                assert_eq!(resource, "deploy");
                assert_eq!(right, "FileSystem/Execute");
            }
            other => panic!("expected AccessDenied, got {other:?}"),
        }
    }

    struct BrokenPolicy;

    impl Policy for BrokenPolicy {
        fn evaluate(&self, _: &Identity, _: &str, _: &Right) -> Result<bool> {
            Err(VaultError::Policy("directory unreachable".into()))
        }
    }

    struct BrokenLoader;

    impl PolicyLoader for BrokenLoader {
        fn load(&self, _: &str, _: &[String]) -> Result<Arc<dyn Policy>> {
            Ok(Arc::new(BrokenPolicy))
        }
    }

    #[test]
    fn evaluation_errors_deny_but_are_kept_by_check() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text(KEY, "").unwrap();
        let gate = SecurityGate::open(
            PathResolver::new(mem.clone()),
            FOLDER,
            Arc::new(BrokenLoader),
            vec![],
            true,
        )
        .unwrap();
        assert!(!gate.authorize(&ops(), "plan", &Right::execute()));
        assert!(matches!(
            gate.check(&ops(), "plan", &Right::execute()),
            Err(VaultError::Policy(_))
        ));
        assert!(matches!(
            gate.authorize_or_fail(&ops(), "plan", &Right::execute()),
            Err(VaultError::Policy(_))
        ));
    }

    #[test]
    fn refresh_swaps_policy_when_stamp_moves() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text(KEY, ALLOW_OPS).unwrap();
        let gate = gate_over(&mem, false).unwrap();
        let first = gate.last_modified().unwrap();

        assert_eq!(gate.refresh().unwrap(), RefreshOutcome::Unchanged);

        mem.write_text(KEY, DENY_ALL).unwrap();
        assert_eq!(gate.refresh().unwrap(), RefreshOutcome::Reloaded);
        assert!(gate.last_modified().unwrap() > first);
        assert!(!gate.authorize(&ops(), "plan", &Right::execute()));
    }

    #[test]
    fn broken_reload_keeps_previous_policy() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text(KEY, ALLOW_OPS).unwrap();
        let gate = gate_over(&mem, false).unwrap();

        mem.write_text(KEY, "Aces: [ {Trustee: ").unwrap();
        assert!(gate.refresh().is_err());
        // same broken version is not retried every tick
        assert_eq!(gate.refresh().unwrap(), RefreshOutcome::Unchanged);
        assert!(gate.authorize(&ops(), "plan", &Right::execute()));

        mem.write_text(KEY, DENY_ALL).unwrap();
        assert_eq!(gate.refresh().unwrap(), RefreshOutcome::Reloaded);
        assert!(!gate.authorize(&ops(), "plan", &Right::execute()));
    }

    #[test]
    fn vanished_file_keeps_policy() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text(KEY, ALLOW_OPS).unwrap();
        let gate = gate_over(&mem, false).unwrap();
        assert!(mem.remove(KEY));
        assert_eq!(gate.refresh().unwrap(), RefreshOutcome::Absent);
        assert!(gate.is_loaded());
        assert!(!gate.authorize(&Identity::new("eve"), "plan", &Right::execute()));
    }

    #[test]
    fn concurrent_checks_see_whole_policies() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text(KEY, ALLOW_OPS).unwrap();
        let gate = Arc::new(gate_over(&mem, false).unwrap());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        // every snapshot either allows (old) or denies (new), never errors
                        assert!(gate.check(&ops(), "plan", &Right::execute()).is_ok());
                    }
                })
            })
            .collect();

        for i in 0..50 {
            let body = if i % 2 == 0 { DENY_ALL } else { ALLOW_OPS };
            mem.write_text(KEY, body).unwrap();
            gate.refresh().unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }

    #[tokio::test]
    async fn poller_picks_up_changes() {
        let mem = Arc::new(MemoryStore::new());
        mem.write_text(KEY, ALLOW_OPS).unwrap();
        let gate = Arc::new(gate_over(&mem, false).unwrap());
        let poller = gate.spawn_poller(Duration::from_millis(20)).unwrap();

        mem.write_text(KEY, DENY_ALL).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while gate.authorize(&ops(), "plan", &Right::execute()) {
            assert!(tokio::time::Instant::now() < deadline, "poller never reloaded");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        poller.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(poller.is_finished());
    }

    #[test]
    fn poller_needs_runtime() {
        let mem = Arc::new(MemoryStore::new());
        let gate = Arc::new(gate_over(&mem, false).unwrap());
        assert!(gate.spawn_poller(Duration::from_secs(1)).is_none());
    }
}
