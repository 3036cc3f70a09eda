use std::sync::Arc;
use std::time::Duration;

use jobtags_core::JobId;

use crate::StateTransition;

/// Callback contract between the job engine and anything that keeps derived
/// state in sync with job lifecycle changes.
///
/// The engine invokes these hooks after the transition's own transaction has
/// committed, exactly once per transition. Implementations must not retry
/// internally: errors are returned so the engine can decide whether to retry the
/// whole transition or accept a stale derived view.
///
/// ## Rollback
///
/// `on_state_unapplied` is the rollback path. By default it applies the
/// reversed transition, so exactly one state holds the job afterwards.
pub trait TransitionHandler: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Called after a transition was applied.
    fn on_state_applied(&self, transition: &StateTransition) -> Result<(), Self::Error>;

    /// Called when a previously applied transition is rolled back.
    fn on_state_unapplied(&self, transition: &StateTransition) -> Result<(), Self::Error> {
        self.on_state_applied(&transition.reversed())
    }

    /// Called whenever the job's expiration is set or renewed.
    fn on_expire(&self, job_id: &JobId, expire_in: Duration) -> Result<(), Self::Error>;

    /// Called when the job's expiration is cleared.
    fn on_persist(&self, job_id: &JobId) -> Result<(), Self::Error>;
}

impl<H> TransitionHandler for Arc<H>
where
    H: TransitionHandler + ?Sized,
{
    type Error = H::Error;

    fn on_state_applied(&self, transition: &StateTransition) -> Result<(), Self::Error> {
        (**self).on_state_applied(transition)
    }

    fn on_state_unapplied(&self, transition: &StateTransition) -> Result<(), Self::Error> {
        (**self).on_state_unapplied(transition)
    }

    fn on_expire(&self, job_id: &JobId, expire_in: Duration) -> Result<(), Self::Error> {
        (**self).on_expire(job_id, expire_in)
    }

    fn on_persist(&self, job_id: &JobId) -> Result<(), Self::Error> {
        (**self).on_persist(job_id)
    }
}

/// Ordered fan-out to several handlers sharing one error type.
///
/// Handlers run in registration order; the first error stops the chain and is
/// returned unchanged.
pub struct HandlerChain<E> {
    handlers: Vec<Box<dyn TransitionHandler<Error = E>>>,
}

impl<E> HandlerChain<E>
where
    E: core::fmt::Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with<H>(mut self, handler: H) -> Self
    where
        H: TransitionHandler<Error = E> + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<E> Default for HandlerChain<E>
where
    E: core::fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TransitionHandler for HandlerChain<E>
where
    E: core::fmt::Debug + Send + Sync + 'static,
{
    type Error = E;

    fn on_state_applied(&self, transition: &StateTransition) -> Result<(), E> {
        self.handlers
            .iter()
            .try_for_each(|h| h.on_state_applied(transition))
    }

    fn on_state_unapplied(&self, transition: &StateTransition) -> Result<(), E> {
        self.handlers
            .iter()
            .try_for_each(|h| h.on_state_unapplied(transition))
    }

    fn on_expire(&self, job_id: &JobId, expire_in: Duration) -> Result<(), E> {
        self.handlers
            .iter()
            .try_for_each(|h| h.on_expire(job_id, expire_in))
    }

    fn on_persist(&self, job_id: &JobId) -> Result<(), E> {
        self.handlers.iter().try_for_each(|h| h.on_persist(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    impl TransitionHandler for Recorder {
        type Error = String;

        fn on_state_applied(&self, t: &StateTransition) -> Result<(), String> {
            if self.fail {
                return Err("boom".to_string());
            }
            self.seen.lock().unwrap().push(format!(
                "{}:{}->{}",
                t.job_id(),
                t.old_state().unwrap_or("-"),
                t.new_state().unwrap_or("-")
            ));
            Ok(())
        }

        fn on_expire(&self, job_id: &JobId, expire_in: Duration) -> Result<(), String> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{job_id}:expire:{}", expire_in.as_secs()));
            Ok(())
        }

        fn on_persist(&self, job_id: &JobId) -> Result<(), String> {
            self.seen.lock().unwrap().push(format!("{job_id}:persist"));
            Ok(())
        }
    }

    fn job() -> JobId {
        JobId::parse("J1").unwrap()
    }

    #[test]
    fn unapplied_defaults_to_reversed_transition() {
        let rec = Recorder::default();
        let t = StateTransition::new(job(), Some("Enqueued"), Some("Processing"));
        rec.on_state_unapplied(&t).unwrap();
        assert_eq!(rec.seen.lock().unwrap().as_slice(), ["J1:Processing->Enqueued"]);
    }

    #[test]
    fn chain_runs_handlers_in_order_and_stops_on_error() {
        let first = Arc::new(Recorder::default());
        let last = Arc::new(Recorder::default());
        let chain = HandlerChain::new()
            .with(first.clone())
            .with(Recorder {
                fail: true,
                ..Default::default()
            })
            .with(last.clone());
        assert_eq!(chain.len(), 3);

        let err = chain
            .on_state_applied(&StateTransition::created(job(), "Enqueued"))
            .unwrap_err();
        assert_eq!(err, "boom");
        assert_eq!(first.seen.lock().unwrap().len(), 1);
        assert!(last.seen.lock().unwrap().is_empty());

        chain.on_persist(&job()).unwrap();
        chain.on_expire(&job(), Duration::from_secs(60)).unwrap();
        assert_eq!(
            last.seen.lock().unwrap().as_slice(),
            ["J1:persist", "J1:expire:60"]
        );
    }
}
