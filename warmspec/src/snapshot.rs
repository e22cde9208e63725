//! Configuration snapshot cache.
//!
//! The suite engine assumes its configuration is set up once per process.
//! To run repeatedly, the one-time setup is recorded as a log of
//! [`ConfigOp`]s (forwarded to the live configuration as they happen), and
//! after every run the live configuration is reset and the log re-applied.
//!
//! Shared group registrations made during setup are stashed alongside the
//! log, since resetting the world clears them.

use anyhow::{Result, bail};
use thiserror::Error;
use tracing::debug;

use crate::suite::config::{ConfigError, ConfigOp, ConfigOpKind, Configure};
use crate::suite::world::{RegisteredShared, SharedRegistry, World};

/// Op kinds skipped on replay unless configured otherwise.
///
/// `CacheReporter` binds the output stream current at the time it runs;
/// replaying it would pin the next run's report to a previous destination.
pub const DEFAULT_REPLAY_EXCLUSIONS: &[ConfigOpKind] = &[ConfigOpKind::CacheReporter];

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no configuration snapshot has been recorded")]
    NoSnapshot,
    #[error("replaying `{op}` failed: {source}")]
    Op {
        op: ConfigOp,
        #[source]
        source: ConfigError,
    },
}

/// The recorded setup.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub log: Vec<ConfigOp>,
    pub shared: SharedRegistry,
}

/// Counts from one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Records every op applied through it and forwards it to the real target.
pub struct Recorder<'a> {
    target: &'a mut dyn Configure,
    log: Vec<ConfigOp>,
}

impl<'a> Recorder<'a> {
    pub fn new(target: &'a mut dyn Configure) -> Self {
        Self {
            target,
            log: Vec::new(),
        }
    }

    pub fn log(&self) -> &[ConfigOp] {
        &self.log
    }

    pub fn into_log(self) -> Vec<ConfigOp> {
        self.log
    }
}

impl Configure for Recorder<'_> {
    fn reset(&mut self) {
        self.target.reset();
    }

    fn apply(&mut self, op: &ConfigOp) -> Result<(), ConfigError> {
        self.target.apply(op)?;
        self.log.push(op.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigCache {
    snapshot: Option<Snapshot>,
    exclusions: Vec<ConfigOpKind>,
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_EXCLUSIONS.to_vec())
    }
}

impl ConfigCache {
    pub fn new(exclusions: Vec<ConfigOpKind>) -> Self {
        Self {
            snapshot: None,
            exclusions,
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn exclusions(&self) -> &[ConfigOpKind] {
        &self.exclusions
    }

    /// Run `init` against a recording proxy of `config`, then keep the log
    /// and the shared registrations present once `init` returns.
    ///
    /// Only one snapshot may exist; a failed `init` leaves none.
    pub fn record<F>(&mut self, config: &mut dyn Configure, world: &mut World, init: F) -> Result<()>
    where
        F: FnOnce(&mut Recorder<'_>, &mut World) -> Result<()>,
    {
        if self.snapshot.is_some() {
            bail!("configuration snapshot already recorded");
        }
        let mut recorder = Recorder::new(config);
        init(&mut recorder, world)?;
        let log = recorder.into_log();
        debug!(ops = log.len(), shared = world.shared_groups().len(), "configuration recorded");
        self.snapshot = Some(Snapshot {
            log,
            shared: world.shared_groups().clone(),
        });
        Ok(())
    }

    /// Reset `config` and `world`, re-apply the log in order (minus excluded
    /// kinds), and restore the stashed shared registrations.
    ///
    /// The first failing op aborts the replay.
    pub fn replay(&self, config: &mut dyn Configure, world: &mut World) -> Result<ReplayReport, ReplayError> {
        let snapshot = self.snapshot.as_ref().ok_or(ReplayError::NoSnapshot)?;
        config.reset();
        world.reset();

        let mut report = ReplayReport {
            applied: 0,
            skipped: 0,
        };
        for op in &snapshot.log {
            if self.exclusions.contains(&op.kind()) {
                report.skipped += 1;
                continue;
            }
            config.apply(op).map_err(|source| ReplayError::Op {
                op: op.clone(),
                source,
            })?;
            report.applied += 1;
        }
        world.restore_shared(snapshot.shared.clone());
        debug!(applied = report.applied, skipped = report.skipped, "configuration replayed");
        Ok(report)
    }

    /// Replace a stashed shared registration, so a reloaded definition
    /// survives later replays.
    pub fn restash_shared(&mut self, registration: RegisteredShared) {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot
                .shared
                .insert(registration.def.name.clone(), registration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::output::NullSink;
    use crate::suite::config::{Configuration, Formatter};
    use crate::suite::parse::SharedDef;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Logs every call it receives.
    #[derive(Default)]
    struct CallLog {
        calls: Vec<String>,
        fail_on: Option<ConfigOpKind>,
    }

    impl Configure for CallLog {
        fn reset(&mut self) {
            self.calls.push("reset".to_string());
        }

        fn apply(&mut self, op: &ConfigOp) -> Result<(), ConfigError> {
            if self.fail_on == Some(op.kind()) {
                return Err(ConfigError::Abort("refused".to_string()));
            }
            self.calls.push(op.to_string());
            Ok(())
        }
    }

    fn shared(name: &str) -> SharedDef {
        SharedDef {
            name: name.to_string(),
            line: 1,
            examples: Vec::new(),
        }
    }

    fn recorded_cache(world: &mut World) -> ConfigCache {
        let mut cache = ConfigCache::default();
        let mut target = CallLog::default();
        cache
            .record(&mut target, world, |config, world| {
                config.apply(&ConfigOp::SetFormatter(Formatter::Documentation))?;
                config.apply(&ConfigOp::CacheReporter)?;
                config.apply(&ConfigOp::SetFailFast(true))?;
                world.define_shared("./helper.ws", shared("stashed"));
                Ok(())
            })
            .expect("record");
        assert_eq!(target.calls.len(), 3, "record forwards to the real target");
        cache
    }

    #[test]
    fn replay_is_idempotent_and_skips_reporter() {
        let mut world = World::new();
        let cache = recorded_cache(&mut world);

        let mut first = CallLog::default();
        let mut second = CallLog::default();
        cache.replay(&mut first, &mut world).expect("replay");
        cache.replay(&mut second, &mut world).expect("replay");

        assert_eq!(first.calls, second.calls);
        assert_eq!(
            first.calls,
            vec!["reset", "formatter Documentation", "fail_fast true"]
        );
    }

    #[test]
    fn replay_restores_stashed_shared_groups() {
        let mut world = World::new();
        let cache = recorded_cache(&mut world);

        world.define_shared("./other.ws", shared("run scoped"));
        let mut target = CallLog::default();
        let report = cache.replay(&mut target, &mut world).expect("replay");

        assert_eq!(report, ReplayReport { applied: 2, skipped: 1 });
        let names: Vec<&String> = world.shared_groups().keys().collect();
        assert_eq!(names, vec!["stashed"]);
    }

    #[test]
    fn exclusions_are_configurable() {
        let mut world = World::new();
        let mut cache = ConfigCache::new(Vec::new());
        let mut target = CallLog::default();
        cache
            .record(&mut target, &mut world, |config, _| {
                config.apply(&ConfigOp::CacheReporter)?;
                Ok(())
            })
            .expect("record");

        let mut replayed = CallLog::default();
        cache.replay(&mut replayed, &mut world).expect("replay");
        assert_eq!(replayed.calls, vec!["reset", "reporter"]);
    }

    #[test]
    fn failing_op_propagates() {
        let mut world = World::new();
        let cache = recorded_cache(&mut world);
        let mut target = CallLog {
            fail_on: Some(ConfigOpKind::SetFailFast),
            ..CallLog::default()
        };
        let err = cache.replay(&mut target, &mut world).expect_err("should fail");
        assert!(matches!(err, ReplayError::Op { op: ConfigOp::SetFailFast(true), .. }));
    }

    #[test]
    fn only_one_snapshot_per_cache() {
        let mut world = World::new();
        let mut cache = recorded_cache(&mut world);
        let mut target = CallLog::default();
        let err = cache
            .record(&mut target, &mut world, |_, _| Ok(()))
            .expect_err("second record");
        assert!(err.to_string().contains("already recorded"));
    }

    #[test]
    fn failed_init_leaves_no_snapshot() {
        let mut world = World::new();
        let mut cache = ConfigCache::default();
        let mut target = CallLog::default();
        let result = cache.record(&mut target, &mut world, |_, _| anyhow::bail!("init broke"));
        assert!(result.is_err());
        assert!(!cache.has_snapshot());
        assert!(matches!(
            cache.replay(&mut target, &mut world),
            Err(ReplayError::NoSnapshot)
        ));
    }

    #[test]
    fn replay_undoes_run_mutations_on_real_configuration() {
        let mut world = World::new();
        let mut cache = ConfigCache::default();
        let mut config = Configuration::new(Arc::new(NullSink));
        cache
            .record(&mut config, &mut world, |config, _| {
                config.apply(&ConfigOp::SetPersistencePath(PathBuf::from(".results")))?;
                Ok(())
            })
            .expect("record");

        config
            .apply(&ConfigOp::SetFormatter(Formatter::Documentation))
            .expect("run-time mutation");
        cache.replay(&mut config, &mut world).expect("replay");

        assert_eq!(config.formatter, Formatter::Progress);
        assert_eq!(config.persistence_path, Some(PathBuf::from(".results")));
    }

    #[test]
    fn restash_replaces_registration() {
        let mut world = World::new();
        let mut cache = recorded_cache(&mut world);
        cache.restash_shared(RegisteredShared {
            origin: "./helper.ws".to_string(),
            def: SharedDef {
                line: 9,
                ..shared("stashed")
            },
        });
        let mut target = CallLog::default();
        cache.replay(&mut target, &mut world).expect("replay");
        assert_eq!(world.shared_groups()["stashed"].def.line, 9);
    }
}
