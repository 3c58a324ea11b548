//! Default push subscriber: pokes every push-triggered job whose repository
//! matches the pushed one.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RouterError};
use crate::event::EventKind;
use crate::filter::path_matches;
use crate::jobs::{BuildJob, JobRegistry, PushTrigger, StringParameter};
use crate::listener::RepositoryListener;
use crate::payload::PushPayload;
use crate::repository::RepositoryIdentity;
use crate::security::{ElevatedContext, SecurityContext};
use crate::subscriber::{EventSubscriber, panic_message};

/// Build parameter carrying the pushed head commit
pub const COMMIT_SHA_PARAMETER: &str = "sha1";

const PUSH_EVENTS: &[EventKind] = &[EventKind::Push];

pub struct PushDispatcher {
    registry: Arc<dyn JobRegistry>,
    listeners: Vec<Arc<dyn RepositoryListener>>,
}

impl PushDispatcher {
    pub fn new(registry: Arc<dyn JobRegistry>) -> Self {
        Self {
            registry,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn RepositoryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Returns the number of jobs whose trigger accepted the push.
    fn poke_jobs(
        &self,
        elevated: &ElevatedContext<'_>,
        repository: &RepositoryIdentity,
        push: &PushPayload,
        parameters: &[StringParameter],
    ) -> usize {
        let mut poked = 0;

        for job in self.registry.all_jobs(elevated) {
            if !self.is_applicable(job.as_ref()) {
                continue;
            }
            let Some(trigger) = job.push_trigger() else {
                continue;
            };
            let name = job.full_name();
            debug!(job = name, "Considering to poke");

            if !job.repository_identities().contains(repository) {
                debug!(job = name, "Skipped because it doesn't have a matching repository");
                continue;
            }
            if !path_matches(job.repository_path(), &push.commits) {
                debug!(
                    job = name,
                    repository_path = job.repository_path().unwrap_or_default(),
                    "Skipped because no changed path is under the job's repository path"
                );
                continue;
            }
            if !job.branch_policy().allows(push.branch()) {
                debug!(
                    job = name,
                    branch = push.branch().unwrap_or_default(),
                    "Skipped because the job's branch policy excludes the branch"
                );
                continue;
            }

            info!(job = name, sha1 = %push.after_sha, "Poked");
            match trigger_job(trigger, name, elevated, &push.pusher_name, parameters) {
                Ok(()) => poked += 1,
                Err(e) => warn!(job = name, "Failed to trigger build: {}", e),
            }
        }

        poked
    }
}

/// Runs one job's trigger. A panicking trigger becomes
/// [`RouterError::TriggerFailed`] so the remaining jobs still get poked.
fn trigger_job(
    trigger: &dyn PushTrigger,
    job: &str,
    elevated: &ElevatedContext<'_>,
    pusher_name: &str,
    parameters: &[StringParameter],
) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        trigger.on_post(elevated, pusher_name, parameters)
    }))
    .unwrap_or_else(|panic| {
        Err(RouterError::TriggerFailed {
            job: job.to_string(),
            message: format!("trigger panicked: {}", panic_message(panic.as_ref())),
        })
    })
}

impl EventSubscriber for PushDispatcher {
    fn name(&self) -> &str {
        "default-push"
    }

    fn events(&self) -> &[EventKind] {
        PUSH_EVENTS
    }

    fn is_applicable(&self, job: &dyn BuildJob) -> bool {
        job.has_active_push_trigger()
    }

    fn on_event(&self, ctx: &mut SecurityContext, _event: EventKind, payload: &str) -> Result<()> {
        let push = PushPayload::parse(payload)?;
        info!("Received POST for {}", push.repository_url);

        let repository = match RepositoryIdentity::from_web_url(&push.repository_url) {
            Ok(repository) => repository,
            Err(_) => {
                warn!("Malformed repo url {}", push.repository_url);
                return Ok(());
            }
        };

        let parameters = [StringParameter::new(COMMIT_SHA_PARAMETER, push.after_sha.as_str())];

        let poked = {
            let elevated = ctx.impersonate_system();
            self.poke_jobs(&elevated, &repository, &push, &parameters)
        };
        debug!(%repository, poked, "Finished poking jobs");

        for listener in &self.listeners {
            let notified = panic::catch_unwind(AssertUnwindSafe(|| {
                listener.on_push_repository_changed(&push.pusher_name, &repository)
            }));
            if let Err(panic) = notified {
                error!(%repository, "Repository listener panicked: {}", panic_message(panic.as_ref()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventEnvelope;
    use crate::filter::BranchPolicy;
    use crate::security::Principal;
    use crate::subscriber::SubscriberRegistry;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTrigger {
        calls: Mutex<Vec<(String, Vec<StringParameter>, Principal)>>,
        fail: bool,
        panic: bool,
    }

    impl PushTrigger for RecordingTrigger {
        fn on_post(
            &self,
            elevated: &ElevatedContext<'_>,
            pusher_name: &str,
            parameters: &[StringParameter],
        ) -> Result<()> {
            self.calls.lock().unwrap().push((
                pusher_name.to_string(),
                parameters.to_vec(),
                elevated.principal(),
            ));
            if self.panic {
                panic!("build queue exploded");
            }
            if self.fail {
                return Err(RouterError::TriggerFailed {
                    job: "test".to_string(),
                    message: "queue full".to_string(),
                });
            }
            Ok(())
        }
    }

    struct FakeJob {
        name: &'static str,
        identities: HashSet<RepositoryIdentity>,
        repository_path: Option<&'static str>,
        branch_policy: BranchPolicy,
        hidden: bool,
        trigger: Option<Arc<RecordingTrigger>>,
    }

    impl FakeJob {
        fn new(name: &'static str, url: &str) -> Self {
            Self {
                name,
                identities: HashSet::from([RepositoryIdentity::parse(url).unwrap()]),
                repository_path: None,
                branch_policy: BranchPolicy::Any,
                hidden: false,
                trigger: Some(Arc::new(RecordingTrigger::default())),
            }
        }

        fn path(mut self, path: &'static str) -> Self {
            self.repository_path = Some(path);
            self
        }

        fn hidden(mut self) -> Self {
            self.hidden = true;
            self
        }

        fn failing(mut self) -> Self {
            self.trigger = Some(Arc::new(RecordingTrigger {
                fail: true,
                ..Default::default()
            }));
            self
        }

        fn panicking(mut self) -> Self {
            self.trigger = Some(Arc::new(RecordingTrigger {
                panic: true,
                ..Default::default()
            }));
            self
        }

        fn without_trigger(mut self) -> Self {
            self.trigger = None;
            self
        }

        fn policy(mut self, policy: BranchPolicy) -> Self {
            self.branch_policy = policy;
            self
        }
    }

    impl BuildJob for FakeJob {
        fn full_name(&self) -> &str {
            self.name
        }

        fn push_trigger(&self) -> Option<&dyn PushTrigger> {
            self.trigger.as_deref().map(|t| t as &dyn PushTrigger)
        }

        fn repository_identities(&self) -> &HashSet<RepositoryIdentity> {
            &self.identities
        }

        fn repository_path(&self) -> Option<&str> {
            self.repository_path
        }

        fn branch_policy(&self) -> &BranchPolicy {
            &self.branch_policy
        }
    }

    struct FakeRegistry {
        jobs: Vec<Arc<FakeJob>>,
    }

    impl FakeRegistry {
        fn new(jobs: Vec<FakeJob>) -> (Arc<Self>, Vec<Option<Arc<RecordingTrigger>>>) {
            let triggers = jobs.iter().map(|j| j.trigger.clone()).collect();
            let jobs = jobs.into_iter().map(Arc::new).collect();
            (Arc::new(Self { jobs }), triggers)
        }
    }

    impl JobRegistry for FakeRegistry {
        fn all_jobs(&self, _elevated: &ElevatedContext<'_>) -> Vec<Arc<dyn BuildJob>> {
            self.jobs
                .iter()
                .map(|j| Arc::clone(j) as Arc<dyn BuildJob>)
                .collect()
        }

        fn visible_jobs(&self, ctx: &SecurityContext) -> Vec<Arc<dyn BuildJob>> {
            self.jobs
                .iter()
                .filter(|j| ctx.is_elevated() || !j.hidden)
                .map(|j| Arc::clone(j) as Arc<dyn BuildJob>)
                .collect()
        }
    }

    struct PanickingListener;

    impl RepositoryListener for PanickingListener {
        fn on_push_repository_changed(&self, _pusher_name: &str, _repository: &RepositoryIdentity) {
            panic!("listener exploded");
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        calls: Mutex<Vec<(String, RepositoryIdentity)>>,
    }

    impl RepositoryListener for RecordingListener {
        fn on_push_repository_changed(&self, pusher_name: &str, repository: &RepositoryIdentity) {
            self.calls
                .lock()
                .unwrap()
                .push((pusher_name.to_string(), repository.clone()));
        }
    }

    const WIDGETS_PUSH: &str = r#"{"repository":{"url":"https://github.com/acme/widgets"},"pusher":{"name":"alice"},"after":"deadbeef","commits":[{"modified":["lib/a.go"],"added":[],"removed":[]}]}"#;

    fn dispatch(
        jobs: Vec<FakeJob>,
        payload: &str,
    ) -> (
        Result<()>,
        Vec<Option<Arc<RecordingTrigger>>>,
        Arc<RecordingListener>,
    ) {
        let (registry, triggers) = FakeRegistry::new(jobs);
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = PushDispatcher::new(registry).with_listener(listener.clone());
        let mut ctx = SecurityContext::anonymous();
        let result = dispatcher.on_event(&mut ctx, EventKind::Push, payload);
        assert_eq!(ctx.principal(), Principal::Anonymous);
        (result, triggers, listener)
    }

    fn calls(trigger: &Option<Arc<RecordingTrigger>>) -> Vec<(String, Vec<StringParameter>, Principal)> {
        trigger.as_ref().unwrap().calls.lock().unwrap().clone()
    }

    fn widgets_identity() -> RepositoryIdentity {
        RepositoryIdentity::new("github.com", "acme", "widgets")
    }

    #[test]
    fn matching_job_is_poked_once_with_sha_parameter() {
        let (result, triggers, listener) = dispatch(
            vec![FakeJob::new("widgets", "https://github.com/acme/widgets").path("lib")],
            WIDGETS_PUSH,
        );

        result.unwrap();
        assert_eq!(
            calls(&triggers[0]),
            [(
                "alice".to_string(),
                vec![StringParameter::new("sha1", "deadbeef")],
                Principal::System
            )]
        );
        assert_eq!(
            *listener.calls.lock().unwrap(),
            [("alice".to_string(), widgets_identity())]
        );
    }

    #[test]
    fn path_mismatch_skips_job_but_still_notifies() {
        let (result, triggers, listener) = dispatch(
            vec![FakeJob::new("docs", "https://github.com/acme/widgets").path("docs")],
            WIDGETS_PUSH,
        );

        result.unwrap();
        assert!(calls(&triggers[0]).is_empty());
        assert_eq!(listener.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn whole_repository_job_ignores_changed_paths() {
        let (_, triggers, _) = dispatch(
            vec![FakeJob::new("all", "git@github.com:acme/widgets.git")],
            WIDGETS_PUSH,
        );
        assert_eq!(calls(&triggers[0]).len(), 1);
    }

    #[test]
    fn other_repositories_are_skipped() {
        let (_, triggers, listener) = dispatch(
            vec![FakeJob::new("gadgets", "https://github.com/acme/gadgets")],
            WIDGETS_PUSH,
        );
        assert!(calls(&triggers[0]).is_empty());
        assert_eq!(listener.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn jobs_without_push_trigger_are_skipped() {
        let (result, triggers, _) = dispatch(
            vec![FakeJob::new("manual", "https://github.com/acme/widgets").without_trigger()],
            WIDGETS_PUSH,
        );
        result.unwrap();
        assert!(triggers[0].is_none());
    }

    #[test]
    fn hidden_jobs_are_poked() {
        let (_, triggers, _) = dispatch(
            vec![FakeJob::new("secret", "https://github.com/acme/widgets").hidden()],
            WIDGETS_PUSH,
        );
        assert_eq!(calls(&triggers[0]).len(), 1);
    }

    #[test]
    fn failing_trigger_does_not_stop_later_jobs() {
        let (result, triggers, listener) = dispatch(
            vec![
                FakeJob::new("first", "https://github.com/acme/widgets").failing(),
                FakeJob::new("second", "https://github.com/acme/widgets"),
            ],
            WIDGETS_PUSH,
        );

        result.unwrap();
        assert_eq!(calls(&triggers[0]).len(), 1);
        assert_eq!(calls(&triggers[1]).len(), 1);
        assert_eq!(listener.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_trigger_does_not_stop_later_jobs() {
        let (registry, triggers) = FakeRegistry::new(vec![
            FakeJob::new("first", "https://github.com/acme/widgets").panicking(),
            FakeJob::new("second", "https://github.com/acme/widgets"),
        ]);
        let listener = Arc::new(RecordingListener::default());
        let subscribers = SubscriberRegistry::new()
            .with(Arc::new(PushDispatcher::new(registry).with_listener(listener.clone())));

        let report = subscribers.dispatch(&EventEnvelope::new(EventKind::Push, WIDGETS_PUSH));

        assert_eq!(report.delivered, 1);
        assert!(report.failed.is_empty());
        assert_eq!(calls(&triggers[0]).len(), 1);
        assert_eq!(calls(&triggers[1]).len(), 1);
        assert_eq!(listener.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_trigger_is_reported_as_trigger_failure() {
        let trigger = RecordingTrigger {
            panic: true,
            ..Default::default()
        };
        let mut ctx = SecurityContext::anonymous();
        let elevated = ctx.impersonate_system();

        let result = trigger_job(&trigger, "widgets", &elevated, "alice", &[]);

        match result {
            Err(RouterError::TriggerFailed { job, message }) => {
                assert_eq!(job, "widgets");
                assert!(message.contains("build queue exploded"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn panicking_listener_does_not_stop_later_listeners() {
        let (registry, triggers) =
            FakeRegistry::new(vec![FakeJob::new("widgets", "https://github.com/acme/widgets")]);
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = PushDispatcher::new(registry)
            .with_listener(Arc::new(PanickingListener))
            .with_listener(listener.clone());

        let mut ctx = SecurityContext::anonymous();
        dispatcher
            .on_event(&mut ctx, EventKind::Push, WIDGETS_PUSH)
            .unwrap();

        assert_eq!(calls(&triggers[0]).len(), 1);
        assert_eq!(
            *listener.calls.lock().unwrap(),
            [("alice".to_string(), widgets_identity())]
        );
    }

    #[test]
    fn malformed_repository_url_is_a_silent_no_op() {
        let payload = r#"{"repository":{"url":"not-a-url"},"pusher":{"name":"alice"},"after":"deadbeef","commits":[]}"#;
        let (result, triggers, listener) = dispatch(
            vec![FakeJob::new("widgets", "https://github.com/acme/widgets")],
            payload,
        );

        result.unwrap();
        assert!(calls(&triggers[0]).is_empty());
        assert!(listener.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unparseable_payload_is_reported_to_the_registry() {
        let (result, triggers, listener) = dispatch(
            vec![FakeJob::new("widgets", "https://github.com/acme/widgets")],
            r#"{"pusher":{"name":"alice"}}"#,
        );

        assert!(result.is_err());
        assert!(calls(&triggers[0]).is_empty());
        assert!(listener.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn branch_policy_is_applied() {
        let payload = r#"{"ref":"refs/heads/master","repository":{"url":"https://github.com/acme/widgets"},"pusher":{"name":"alice"},"after":"deadbeef","commits":[]}"#;
        let (_, triggers, _) = dispatch(
            vec![
                FakeJob::new("ignores-master", "https://github.com/acme/widgets").policy(
                    BranchPolicy::IgnoreMaster {
                        master_branch: "master".to_string(),
                    },
                ),
                FakeJob::new("only-master", "https://github.com/acme/widgets").policy(
                    BranchPolicy::OnlyMaster {
                        master_branch: "master".to_string(),
                    },
                ),
            ],
            payload,
        );

        assert!(calls(&triggers[0]).is_empty());
        assert_eq!(calls(&triggers[1]).len(), 1);
    }

    #[test]
    fn dispatcher_subscribes_to_push_only() {
        let (registry, _) = FakeRegistry::new(Vec::new());
        let dispatcher = PushDispatcher::new(registry);

        assert!(dispatcher.is_interested_in(EventKind::Push));
        assert!(!dispatcher.is_interested_in(EventKind::PullRequest));
        assert!(dispatcher.is_applicable(&FakeJob::new("a", "https://h/o/r")));
        assert!(!dispatcher.is_applicable(&FakeJob::new("b", "https://h/o/r").without_trigger()));
    }
}
