//! Query client sitting between the closure engine and a [`SpatialStore`].

use std::cell::Cell;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::entity::EntityId;
use crate::extent::Extent;
use crate::store::{GroupRow, PathRow, PointRow, QueryError, SpatialStore};

/// Deadline and cancellation state shared by every query of an extraction.
///
/// The default context never expires and cannot be cancelled.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tessera_core::QueryContext;
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let ctx = QueryContext::default()
///     .with_timeout(Duration::from_secs(30))
///     .with_cancellation(token.clone());
/// assert!(ctx.check().is_ok());
///
/// token.cancel();
/// assert!(ctx.is_interrupted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

impl QueryContext {
    /// Fail queries once `deadline` has passed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fail queries once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        // An unrepresentable instant means the deadline is effectively never.
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Fail queries once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Configured deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Configured cancellation token, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Return an error when the context is cancelled or expired.
    ///
    /// Cancellation is reported in preference to an expired deadline.
    pub fn check(&self) -> Result<(), QueryError> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(QueryError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(QueryError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Whether [`check`](Self::check) would fail.
    pub fn is_interrupted(&self) -> bool {
        self.check().is_err()
    }
}

/// Issues extent and ID-batch queries against a store.
///
/// The client converts extents to the store's encodings, checks the
/// [`QueryContext`] before each call and short-circuits empty batches without
/// touching the store. Apart from a call counter it holds no state.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use tessera_core::{InMemoryStore, QueryClient, QueryContext};
///
/// let client = QueryClient::new(InMemoryStore::default(), QueryContext::default());
/// let rows = client.fetch_points_by_id(&BTreeSet::new()).expect("empty batch");
/// assert!(rows.is_empty());
/// assert_eq!(client.calls(), 0);
/// ```
#[derive(Debug)]
pub struct QueryClient<S> {
    store: S,
    ctx: QueryContext,
    calls: Cell<usize>,
}

impl<S: SpatialStore> QueryClient<S> {
    /// Wrap a store handle.
    pub fn new(store: S, ctx: QueryContext) -> Self {
        Self {
            store,
            ctx,
            calls: Cell::new(0),
        }
    }

    /// Context applied to every query.
    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    /// Number of store calls issued so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Release the store handle.
    pub fn into_inner(self) -> S {
        self.store
    }

    /// Points inside `extent`, matched on E7 coordinates.
    pub fn fetch_points_in_extent(&self, extent: &Extent) -> Result<Vec<PointRow>, QueryError> {
        let encoded = extent.to_e7();
        self.call(|store, ctx| store.points_in_extent(&encoded, ctx))
    }

    /// Paths whose stored envelope intersects `extent`.
    pub fn fetch_paths_intersecting(&self, extent: &Extent) -> Result<Vec<PathRow>, QueryError> {
        let envelope = extent.to_web_mercator();
        self.call(|store, ctx| store.paths_intersecting(&envelope, ctx))
    }

    /// Groups whose stored envelope intersects `extent`.
    pub fn fetch_groups_intersecting(
        &self,
        extent: &Extent,
    ) -> Result<Vec<GroupRow>, QueryError> {
        let envelope = extent.to_web_mercator();
        self.call(|store, ctx| store.groups_intersecting(&envelope, ctx))
    }

    /// Points with the given IDs.
    pub fn fetch_points_by_id(
        &self,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<PointRow>, QueryError> {
        self.batch(ids, |store, ids, ctx| store.points_by_id(ids, ctx))
    }

    /// Paths with the given IDs.
    pub fn fetch_paths_by_id(&self, ids: &BTreeSet<EntityId>) -> Result<Vec<PathRow>, QueryError> {
        self.batch(ids, |store, ids, ctx| store.paths_by_id(ids, ctx))
    }

    /// Paths referencing any of the given point IDs.
    pub fn fetch_paths_referencing_points(
        &self,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<PathRow>, QueryError> {
        self.batch(ids, |store, ids, ctx| store.paths_referencing_points(ids, ctx))
    }

    /// Groups with a path member among the given IDs.
    pub fn fetch_groups_referencing_paths(
        &self,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<GroupRow>, QueryError> {
        self.batch(ids, |store, ids, ctx| store.groups_referencing_paths(ids, ctx))
    }

    fn batch<T, F>(&self, ids: &BTreeSet<EntityId>, query: F) -> Result<Vec<T>, QueryError>
    where
        F: FnOnce(&S, &[EntityId], &QueryContext) -> Result<Vec<T>, QueryError>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<EntityId> = ids.iter().copied().collect();
        self.call(|store, ctx| query(store, &ids, ctx))
    }

    fn call<T, F>(&self, query: F) -> Result<T, QueryError>
    where
        F: FnOnce(&S, &QueryContext) -> Result<T, QueryError>,
    {
        self.ctx.check()?;
        self.calls.set(self.calls.get() + 1);
        query(&self.store, &self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CallKind, CountingStore};
    use rstest::{fixture, rstest};

    #[fixture]
    fn client() -> QueryClient<CountingStore> {
        QueryClient::new(CountingStore::default(), QueryContext::default())
    }

    #[rstest]
    fn empty_batches_skip_the_store(client: QueryClient<CountingStore>) {
        let none = BTreeSet::new();
        assert!(client.fetch_points_by_id(&none).expect("empty").is_empty());
        assert!(client.fetch_paths_by_id(&none).expect("empty").is_empty());
        assert!(
            client
                .fetch_paths_referencing_points(&none)
                .expect("empty")
                .is_empty()
        );
        assert!(
            client
                .fetch_groups_referencing_paths(&none)
                .expect("empty")
                .is_empty()
        );
        assert_eq!(client.calls(), 0);
        assert!(client.into_inner().calls().is_empty());
    }

    #[rstest]
    fn batches_reach_the_store_sorted(client: QueryClient<CountingStore>) {
        let ids: BTreeSet<EntityId> = [9, 3, 5, 3].into_iter().collect();
        client.fetch_points_by_id(&ids).expect("query succeeds");
        assert_eq!(client.calls(), 1);
        let calls = client.into_inner().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, CallKind::PointsById);
        assert_eq!(calls[0].ids, vec![3, 5, 9]);
    }

    #[rstest]
    fn cancelled_context_fails_before_the_store() {
        let token = CancellationToken::new();
        token.cancel();
        let client = QueryClient::new(
            CountingStore::default(),
            QueryContext::default().with_cancellation(token),
        );
        let extent = Extent::new(0.0, 1.0, 0.0, 1.0).expect("valid extent");
        let err = client
            .fetch_points_in_extent(&extent)
            .expect_err("cancelled");
        assert!(matches!(err, QueryError::Cancelled));
        assert_eq!(client.calls(), 0);
        assert!(client.into_inner().calls().is_empty());
    }

    #[rstest]
    fn expired_deadline_fails_before_the_store() {
        let ctx = QueryContext::default().with_deadline(Instant::now());
        let client = QueryClient::new(CountingStore::default(), ctx);
        let ids: BTreeSet<EntityId> = [1].into_iter().collect();
        let err = client.fetch_paths_by_id(&ids).expect_err("expired");
        assert!(matches!(err, QueryError::DeadlineExceeded));
        assert!(err.is_interruption());
    }

    #[rstest]
    fn cancellation_takes_precedence_over_deadline() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = QueryContext::default()
            .with_deadline(Instant::now())
            .with_cancellation(token);
        assert!(matches!(ctx.check(), Err(QueryError::Cancelled)));
    }

    #[rstest]
    fn generous_timeout_passes() {
        let ctx = QueryContext::default().with_timeout(Duration::from_secs(3600));
        assert!(ctx.deadline().is_some());
        assert!(ctx.check().is_ok());
    }
}
