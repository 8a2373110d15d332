use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::{
    AggregateCredits, EpisodeDetail, MovieCredit, MovieDetail, MovieSummary, Paged,
    PersonDetail, PersonSummary, SearchResult, SeasonDetail, TvDetail, TvSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Pending,
    Fulfilled,
    Rejected,
}

/// Snapshot of one resource: its fetch phase, last good data and last error.
///
/// A rejection keeps whatever data an earlier fetch stored; it is up to the
/// page to decide whether stale data is still worth showing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestState<T> {
    pub phase: Phase,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> Default for RequestState<T> {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            data: None,
            error: None,
        }
    }
}

impl<T> RequestState<T> {
    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Pending
    }

    /// The state one caller's own fetch settled to, independent of any slot.
    pub fn settled(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(data) => Self {
                phase: Phase::Fulfilled,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                phase: Phase::Rejected,
                data: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Proof that a dispatch started; carries the slot-local sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Ticket {
    seq: u64,
}

impl Ticket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

struct SlotInner<T> {
    state: RequestState<T>,
    issued: u64,
    applied: u64,
}

/// A single request-state container.
///
/// Every `begin` hands out a higher sequence number. A result is applied only
/// when its ticket is newer than the last applied one, so a slow early
/// response can never overwrite data from a later dispatch.
pub struct Slot<T> {
    name: &'static str,
    inner: Mutex<SlotInner<T>>,
}

impl<T: Clone> Slot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(SlotInner {
                state: RequestState::default(),
                issued: 0,
                applied: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn begin(&self) -> Ticket {
        let mut inner = self.inner.lock();
        inner.issued += 1;
        inner.state.phase = Phase::Pending;
        inner.state.error = None;
        Ticket { seq: inner.issued }
    }

    /// Stores `data`. Returns false when the response was stale and dropped.
    pub fn fulfill(&self, ticket: Ticket, data: T) -> bool {
        self.fulfill_with(ticket, |_| data)
    }

    /// Like [`Slot::fulfill`], but builds the new data from the current one.
    /// `merge` is not called for stale tickets.
    pub fn fulfill_with<F>(&self, ticket: Ticket, merge: F) -> bool
    where
        F: FnOnce(Option<T>) -> T,
    {
        self.apply(ticket, Phase::Fulfilled, |state| {
            let current = state.data.take();
            state.data = Some(merge(current));
            state.error = None;
        })
    }

    pub fn reject(&self, ticket: Ticket, message: impl Into<String>) -> bool {
        let message = message.into();
        self.apply(ticket, Phase::Rejected, |state| {
            state.error = Some(message);
        })
    }

    fn apply<F>(&self, ticket: Ticket, settled: Phase, update: F) -> bool
    where
        F: FnOnce(&mut RequestState<T>),
    {
        let mut inner = self.inner.lock();
        if ticket.seq <= inner.applied {
            warn!(
                slot = self.name,
                seq = ticket.seq,
                applied = inner.applied,
                "Discarding stale response"
            );
            return false;
        }
        inner.applied = ticket.seq;
        update(&mut inner.state);
        // A newer dispatch is still in flight; keep showing it as loading.
        inner.state.phase = if ticket.seq == inner.issued {
            settled
        } else {
            Phase::Pending
        };
        true
    }

    pub fn snapshot(&self) -> RequestState<T> {
        self.inner.lock().state.clone()
    }

    /// Back to idle. Responses still in flight are discarded when they land.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.applied = inner.issued;
        inner.state = RequestState::default();
    }
}

/// Starts a fetch against `slot`.
///
/// The slot turns `Pending` right away, before the returned future is first
/// polled. The caller always gets its own result back, even when a newer
/// dispatch has already superseded it in the slot.
pub fn dispatch<'a, T, F>(
    slot: &'a Slot<T>,
    fetch: F,
) -> impl Future<Output = Result<T, FetchError>> + 'a
where
    T: Clone + 'a,
    F: Future<Output = Result<T, FetchError>> + 'a,
{
    let ticket = slot.begin();
    async move {
        match fetch.await {
            Ok(data) => {
                slot.fulfill(ticket, data.clone());
                Ok(data)
            }
            Err(e) => {
                warn!("{} fetch failed: {}", slot.name(), e);
                slot.reject(ticket, e.to_string());
                Err(e)
            }
        }
    }
}

/// Starts a paginated fetch that merges page `page` into the listing for `key`.
///
/// Resolves to the merged listing when the response was applied, or to a
/// listing holding just this page when it arrived stale.
pub fn dispatch_page<'a, T, F>(
    slot: &'a Slot<Listing<T>>,
    key: String,
    page: u32,
    fetch: F,
) -> impl Future<Output = Result<Listing<T>, FetchError>> + 'a
where
    T: Clone + 'a,
    F: Future<Output = Result<Paged<T>, FetchError>> + 'a,
{
    let ticket = slot.begin();
    async move {
        match fetch.await {
            Ok(paged) => {
                debug!(
                    "{} page {} -> {} results",
                    slot.name(),
                    page,
                    paged.results.len()
                );
                let mut own = Listing::new(key.clone());
                own.insert(page, paged);
                let mut merged = None;
                slot.fulfill_with(ticket, |current| {
                    let mut listing = current
                        .filter(|listing| listing.key() == key)
                        .unwrap_or_else(|| Listing::new(key.clone()));
                    listing.merge(own.clone());
                    merged = Some(listing.clone());
                    listing
                });
                Ok(merged.unwrap_or(own))
            }
            Err(e) => {
                warn!("{} page {} fetch failed: {}", slot.name(), page, e);
                slot.reject(ticket, e.to_string());
                Err(e)
            }
        }
    }
}

/// Pages of one base query, accumulated by page number.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    key: String,
    pages: BTreeMap<u32, Vec<T>>,
    total_pages: u32,
    total_results: u32,
}

impl<T: Clone> Listing<T> {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pages: BTreeMap::new(),
            total_pages: 0,
            total_results: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Inserts or replaces one page and takes the upstream totals from it.
    pub fn insert(&mut self, page: u32, paged: Paged<T>) {
        self.total_pages = paged.total_pages;
        self.total_results = paged.total_results;
        self.pages.insert(page.max(1), paged.results);
    }

    /// Takes every page of `other`, replacing pages with the same number.
    /// The totals follow `other`.
    pub fn merge(&mut self, other: Listing<T>) {
        self.total_pages = other.total_pages;
        self.total_results = other.total_results;
        self.pages.extend(other.pages);
    }

    pub fn page(&self, page: u32) -> Option<&[T]> {
        self.pages.get(&page).map(Vec::as_slice)
    }

    pub fn contains_page(&self, page: u32) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn last_page(&self) -> u32 {
        self.pages.keys().next_back().copied().unwrap_or(0)
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn total_results(&self) -> u32 {
        self.total_results
    }

    pub fn has_more(&self) -> bool {
        self.last_page() < self.total_pages
    }

    /// All loaded items in page order, never more than `total_results`.
    pub fn items(&self) -> Vec<T> {
        self.pages
            .values()
            .flatten()
            .take(self.total_results as usize)
            .cloned()
            .collect()
    }
}

#[derive(Serialize)]
struct ListingView<'a, T> {
    key: &'a str,
    loaded_pages: Vec<u32>,
    total_pages: u32,
    total_results: u32,
    items: Vec<&'a T>,
}

impl<T: Serialize + Clone> Serialize for Listing<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ListingView {
            key: &self.key,
            loaded_pages: self.pages.keys().copied().collect(),
            total_pages: self.total_pages,
            total_results: self.total_results,
            items: self
                .pages
                .values()
                .flatten()
                .take(self.total_results as usize)
                .collect(),
        }
        .serialize(serializer)
    }
}

/// Every resource the pages read, one slot each.
///
/// Built per server (or per test) and shared through `Arc`; there is no
/// process-wide instance.
pub struct Store {
    pub trending: Slot<Vec<MovieSummary>>,
    pub upcoming: Slot<Vec<MovieSummary>>,
    pub now_playing: Slot<Vec<MovieSummary>>,
    pub top_rated_movies: Slot<Vec<MovieSummary>>,
    pub popular_movies: Slot<Vec<MovieSummary>>,
    pub discover: Slot<Listing<MovieSummary>>,
    pub movie_detail: Slot<MovieDetail>,
    pub similar_movies: Slot<Vec<MovieSummary>>,
    pub tv_airing_today: Slot<Vec<TvSummary>>,
    pub tv_on_the_air: Slot<Vec<TvSummary>>,
    pub tv_popular: Slot<Vec<TvSummary>>,
    pub tv_top_rated: Slot<Vec<TvSummary>>,
    pub tv_detail: Slot<TvDetail>,
    pub similar_tv: Slot<Vec<TvSummary>>,
    pub tv_credits: Slot<AggregateCredits>,
    pub season: Slot<SeasonDetail>,
    pub episode: Slot<EpisodeDetail>,
    pub people: Slot<Listing<PersonSummary>>,
    pub person_detail: Slot<PersonDetail>,
    pub person_credits: Slot<Vec<MovieCredit>>,
    pub search: Slot<Listing<SearchResult>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            trending: Slot::new("trending"),
            upcoming: Slot::new("upcoming"),
            now_playing: Slot::new("now_playing"),
            top_rated_movies: Slot::new("top_rated_movies"),
            popular_movies: Slot::new("popular_movies"),
            discover: Slot::new("discover"),
            movie_detail: Slot::new("movie_detail"),
            similar_movies: Slot::new("similar_movies"),
            tv_airing_today: Slot::new("tv_airing_today"),
            tv_on_the_air: Slot::new("tv_on_the_air"),
            tv_popular: Slot::new("tv_popular"),
            tv_top_rated: Slot::new("tv_top_rated"),
            tv_detail: Slot::new("tv_detail"),
            similar_tv: Slot::new("similar_tv"),
            tv_credits: Slot::new("tv_credits"),
            season: Slot::new("season"),
            episode: Slot::new("episode"),
            people: Slot::new("people"),
            person_detail: Slot::new("person_detail"),
            person_credits: Slot::new("person_credits"),
            search: Slot::new("search"),
        }
    }

    pub fn clear_search(&self) {
        self.search.reset();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn paged(page: u32, ids: &[u64], total_pages: u32, total_results: u32) -> Paged<u64> {
        Paged {
            page,
            results: ids.to_vec(),
            total_pages,
            total_results,
        }
    }

    #[test]
    fn begin_marks_pending_and_clears_error() {
        let slot: Slot<u32> = Slot::new("test");
        let t = slot.begin();
        assert!(slot.reject(t, "boom"));
        assert_eq!(slot.snapshot().error.as_deref(), Some("boom"));

        let _t = slot.begin();
        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Pending);
        assert!(snap.error.is_none());
    }

    #[test]
    fn rejection_keeps_previous_data() {
        let slot = Slot::new("test");
        let t = slot.begin();
        slot.fulfill(t, 7u32);
        let t = slot.begin();
        slot.reject(t, "down");

        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Rejected);
        assert_eq!(snap.data, Some(7));
        assert_eq!(snap.error.as_deref(), Some("down"));
    }

    #[test]
    fn late_stale_response_is_discarded() {
        let slot = Slot::new("test");
        let a = slot.begin();
        let b = slot.begin();

        assert!(slot.fulfill(b, "B"));
        assert!(!slot.fulfill(a, "A"));

        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Fulfilled);
        assert_eq!(snap.data, Some("B"));
    }

    #[test]
    fn early_response_stays_pending_until_latest_lands() {
        let slot = Slot::new("test");
        let a = slot.begin();
        let b = slot.begin();

        assert!(slot.fulfill(a, 1u8));
        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Pending);
        assert_eq!(snap.data, Some(1));

        assert!(slot.reject(b, "late failure"));
        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Rejected);
        assert_eq!(snap.data, Some(1));
    }

    #[test]
    fn reset_discards_in_flight_results() {
        let slot = Slot::new("test");
        let t = slot.begin();
        slot.reset();
        assert!(!slot.fulfill(t, 3u8));
        assert_eq!(slot.snapshot(), RequestState::default());
    }

    #[tokio::test]
    async fn dispatch_is_pending_before_first_poll() {
        let slot: Slot<u32> = Slot::new("test");
        let fut = dispatch(&slot, async { Ok(5) });
        assert_eq!(slot.snapshot().phase, Phase::Pending);

        fut.await.unwrap();
        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Fulfilled);
        assert_eq!(snap.data, Some(5));
    }

    #[tokio::test]
    async fn dispatch_returns_not_found() {
        let slot: Slot<u32> = Slot::new("test");
        let err = dispatch(&slot, async {
            Err(FetchError::NotFound {
                path: "movie/9".to_string(),
            })
        })
        .await
        .unwrap_err();
        assert!(err.is_not_found());
        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Rejected);
        assert_eq!(snap.error.as_deref(), Some("movie/9 not found"));
    }

    #[tokio::test]
    async fn latest_dispatched_wins_when_earlier_resolves_last() {
        let slot: Slot<&'static str> = Slot::new("test");
        let (tx_a, rx_a) = oneshot::channel::<&'static str>();
        let (tx_b, rx_b) = oneshot::channel::<&'static str>();

        let a = dispatch(&slot, async move { Ok(rx_a.await.unwrap()) });
        let b = dispatch(&slot, async move { Ok(rx_b.await.unwrap()) });

        tx_b.send("fresh").unwrap();
        tx_a.send("stale").unwrap();
        b.await.unwrap();
        a.await.unwrap();

        let snap = slot.snapshot();
        assert_eq!(snap.phase, Phase::Fulfilled);
        assert_eq!(snap.data, Some("fresh"));
    }

    #[tokio::test]
    async fn stale_dispatch_still_returns_its_own_data() {
        let slot: Slot<u64> = Slot::new("test");
        let (tx_a, rx_a) = oneshot::channel::<u64>();

        let a = dispatch(&slot, async move { Ok(rx_a.await.unwrap()) });
        assert_eq!(dispatch(&slot, async { Ok(2) }).await.unwrap(), 2);
        tx_a.send(1).unwrap();
        assert_eq!(a.await.unwrap(), 1);
        assert_eq!(slot.snapshot().data, Some(2));

        let listing: Slot<Listing<u64>> = Slot::new("listing");
        let (tx_slow, rx_slow) = oneshot::channel::<Paged<u64>>();
        let slow = dispatch_page(&listing, "slow".into(), 1, async move {
            Ok(rx_slow.await.unwrap())
        });
        let fast = dispatch_page(&listing, "fast".into(), 1, async { Ok(paged(1, &[9], 1, 1)) })
            .await
            .unwrap();
        assert_eq!(fast.key(), "fast");
        tx_slow.send(paged(1, &[1, 2], 1, 2)).unwrap();
        let slow = slow.await.unwrap();
        assert_eq!(slow.key(), "slow");
        assert_eq!(slow.items(), vec![1, 2]);
        assert_eq!(listing.snapshot().data.unwrap().key(), "fast");
    }

    #[test]
    fn merge_replaces_pages_and_takes_totals() {
        let mut listing = Listing::new("q");
        listing.insert(1, paged(1, &[1, 2], 3, 6));
        let mut more = Listing::new("q");
        more.insert(2, paged(2, &[3, 4], 2, 4));
        listing.merge(more);
        assert_eq!(listing.items(), vec![1, 2, 3, 4]);
        assert_eq!(listing.total_pages(), 2);
        assert!(!listing.has_more());
    }

    #[tokio::test]
    async fn same_fetch_twice_is_idempotent() {
        let slot: Slot<Vec<u32>> = Slot::new("test");
        dispatch(&slot, async { Ok(vec![1, 2]) }).await.unwrap();
        let first = slot.snapshot();
        dispatch(&slot, async { Ok(vec![1, 2]) }).await.unwrap();
        assert_eq!(slot.snapshot(), first);

        let listing: Slot<Listing<u64>> = Slot::new("listing");
        dispatch_page(&listing, "q".into(), 1, async { Ok(paged(1, &[1, 2], 2, 4)) })
            .await
            .unwrap();
        let first = listing.snapshot();
        dispatch_page(&listing, "q".into(), 1, async { Ok(paged(1, &[1, 2], 2, 4)) })
            .await
            .unwrap();
        assert_eq!(listing.snapshot(), first);
    }

    #[tokio::test]
    async fn load_more_appends_for_same_key() {
        let slot: Slot<Listing<u64>> = Slot::new("listing");
        dispatch_page(&slot, "q".into(), 1, async { Ok(paged(1, &[1, 2], 2, 4)) })
            .await
            .unwrap();
        dispatch_page(&slot, "q".into(), 2, async { Ok(paged(2, &[3, 4], 2, 4)) })
            .await
            .unwrap();

        let listing = slot.snapshot().data.unwrap();
        assert_eq!(listing.items(), vec![1, 2, 3, 4]);
        assert_eq!(listing.last_page(), 2);
        assert!(!listing.has_more());
    }

    #[tokio::test]
    async fn new_key_resets_listing() {
        let slot: Slot<Listing<u64>> = Slot::new("listing");
        dispatch_page(&slot, "a".into(), 1, async { Ok(paged(1, &[1, 2], 3, 6)) })
            .await
            .unwrap();
        dispatch_page(&slot, "b".into(), 1, async { Ok(paged(1, &[9], 1, 1)) })
            .await
            .unwrap();

        let listing = slot.snapshot().data.unwrap();
        assert_eq!(listing.key(), "b");
        assert_eq!(listing.items(), vec![9]);
    }

    #[test]
    fn items_never_exceed_total_results() {
        let mut listing = Listing::new("q");
        listing.insert(1, paged(1, &[1, 2, 3], 2, 5));
        listing.insert(2, paged(2, &[4, 5, 6, 7], 2, 5));
        assert_eq!(listing.items().len(), 5);

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["items"].as_array().unwrap().len(), 5);
        assert_eq!(json["loaded_pages"], serde_json::json!([1, 2]));
    }

    #[test]
    fn clear_search_returns_to_idle() {
        let store = Store::new();
        let t = store.search.begin();
        store.search.fulfill(t, Listing::new("matrix"));
        store.clear_search();
        assert_eq!(store.search.snapshot().phase, Phase::Idle);
        assert!(store.search.snapshot().data.is_none());
    }
}
