//! One-stop wiring of the tag index components over a single storage.

use jobtags_core::{JobId, TagIndexResult};

use crate::config::TagIndexConfig;
use crate::index::{
    ExpiredJobReclaimer, StateIndexStore, StateTransitionListener, TagMembershipStore,
};
use crate::keys::KeySpace;
use crate::query::{InvocationDecoder, JsonInvocationDecoder, TagQueryEngine};
use crate::store::TagStorage;

/// The tag index: every component shares the injected storage and config.
///
/// ```ignore
/// let index = TagIndex::new(InMemoryTagStorage::arc(), TagIndexConfig::from_env());
/// index.attach_tags(&job_id, &["billing", "nightly"])?;
/// index.listener().on_transition(&job_id, None, Some("Enqueued"))?;
/// let failed = index.queries().count(&["billing"], Some("Failed"))?;
/// ```
#[derive(Debug, Clone)]
pub struct TagIndex<S, D = JsonInvocationDecoder> {
    config: TagIndexConfig,
    membership: TagMembershipStore<S>,
    states: StateIndexStore<S>,
    listener: StateTransitionListener<S>,
    queries: TagQueryEngine<S, D>,
    reclaimer: ExpiredJobReclaimer<S>,
}

impl<S> TagIndex<S, JsonInvocationDecoder>
where
    S: TagStorage + Clone,
{
    pub fn new(storage: S, config: TagIndexConfig) -> Self {
        Self::with_decoder(storage, config, JsonInvocationDecoder::new())
    }
}

impl<S, D> TagIndex<S, D>
where
    S: TagStorage + Clone,
    D: InvocationDecoder,
{
    pub fn with_decoder(storage: S, config: TagIndexConfig, decoder: D) -> Self {
        let keys = KeySpace::new(config.key_prefix.clone());
        Self {
            membership: TagMembershipStore::new(storage.clone(), keys.clone()),
            states: StateIndexStore::new(storage.clone(), keys.clone()),
            listener: StateTransitionListener::new(storage.clone(), keys),
            queries: TagQueryEngine::new(storage.clone(), &config, decoder),
            reclaimer: ExpiredJobReclaimer::new(storage, &config),
            config,
        }
    }

    pub fn config(&self) -> &TagIndexConfig {
        &self.config
    }

    pub fn membership(&self) -> &TagMembershipStore<S> {
        &self.membership
    }

    pub fn states(&self) -> &StateIndexStore<S> {
        &self.states
    }

    pub fn listener(&self) -> &StateTransitionListener<S> {
        &self.listener
    }

    pub fn queries(&self) -> &TagQueryEngine<S, D> {
        &self.queries
    }

    pub fn reclaimer(&self) -> &ExpiredJobReclaimer<S> {
        &self.reclaimer
    }

    /// Shorthand for `membership().attach_tags(..)`, called at job creation.
    pub fn attach_tags<T: AsRef<str>>(&self, job_id: &JobId, tags: &[T]) -> TagIndexResult<()> {
        self.membership.attach_tags(job_id, tags)
    }
}
