//! Pagination Driver (C8): turns an offset-paged endpoint into a lazy,
//! cancellable stream of items (spec §4.5).
//!
//! Nothing is fetched until the stream is polled, and dropping the stream
//! mid-iteration performs no further fetches — both fall out of
//! `async-stream`'s generator desugaring, which only runs code between
//! `yield` points when polled.

use async_stream::try_stream;
use futures_core::stream::Stream;
use serde::de::DeserializeOwned;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::request::{Method, RequestDescriptor};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 50;

/// One page of results as the underlying API returns it.
#[derive(Debug, serde::Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
    pub next_offset: Option<u32>,
}

/// One page of a cursor-paginated endpoint (spec §4.5: "cursor-paginated
/// variants substitute `cursor_after` for offset").
#[derive(Debug, serde::Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
    pub cursor_after: Option<String>,
}

/// Bounds on how far a paginated stream will walk before stopping on its
/// own, independent of the caller dropping it early (spec §4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct PaginationLimits {
    pub max_items: Option<usize>,
    pub max_pages: Option<usize>,
}

/// Builds a lazy stream of `T` over an offset-paginated endpoint.
///
/// `page_size` is clamped into `1..=50`; `build_page` receives `(offset,
/// limit)` and must return a [`RequestDescriptor`] for that page.
pub fn paginate<T>(
    client: &Client,
    page_size: u32,
    limits: PaginationLimits,
    build_page: impl Fn(u32, u32) -> RequestDescriptor + Send + 'static,
) -> impl Stream<Item = Result<T>> + Send + '_
where
    T: DeserializeOwned + Send + 'static,
{
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

    try_stream! {
        let mut offset: u32 = 0;
        let mut emitted: usize = 0;
        let mut pages_fetched: usize = 0;

        loop {
            if let Some(max_pages) = limits.max_pages {
                if pages_fetched >= max_pages {
                    return;
                }
            }

            let descriptor = build_page(offset, page_size);
            let body = client.request(descriptor).await?;
            pages_fetched += 1;

            let page: Page<T> = serde_json::from_slice(&body).map_err(|_| Error::UnexpectedResponse)?;
            let page_len = page.items.len();

            for item in page.items {
                if let Some(max_items) = limits.max_items {
                    if emitted >= max_items {
                        return;
                    }
                }
                emitted += 1;
                yield item;
            }

            match page.next_offset {
                Some(next) if page_len > 0 => offset = next,
                _ => return,
            }
        }
    }
}

/// Builds a lazy stream of whole [`Page<T>`]s rather than flattened items,
/// for callers that need page-level metadata (`total`, page boundaries)
/// rather than a flat item sequence (spec §4.5: "sequence of either pages
/// or individual items"). Termination and cancellation rules are identical
/// to [`paginate`]; only the yielded unit differs.
pub fn paginate_pages<T>(
    client: &Client,
    page_size: u32,
    limits: PaginationLimits,
    build_page: impl Fn(u32, u32) -> RequestDescriptor + Send + 'static,
) -> impl Stream<Item = Result<Page<T>>> + Send + '_
where
    T: DeserializeOwned + Send + 'static,
{
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

    try_stream! {
        let mut offset: u32 = 0;
        let mut pages_fetched: usize = 0;
        let mut items_emitted: usize = 0;

        loop {
            if let Some(max_pages) = limits.max_pages {
                if pages_fetched >= max_pages {
                    return;
                }
            }

            let descriptor = build_page(offset, page_size);
            let body = client.request(descriptor).await?;
            pages_fetched += 1;

            let page: Page<T> = serde_json::from_slice(&body).map_err(|_| Error::UnexpectedResponse)?;
            let page_len = page.items.len();
            let next_offset = page.next_offset;
            items_emitted += page_len;

            let stop_after_this_page = matches!(limits.max_items, Some(max) if items_emitted >= max)
                || next_offset.is_none()
                || page_len == 0;

            yield page;

            if stop_after_this_page {
                return;
            }
            offset = next_offset.expect("checked above");
        }
    }
}

/// Cursor-paginated equivalent of [`paginate`]: walks `cursor_after`
/// instead of `offset`, terminating when a page returns no cursor
/// (spec §4.5).
pub fn paginate_cursor<T>(
    client: &Client,
    page_size: u32,
    limits: PaginationLimits,
    build_page: impl Fn(Option<String>, u32) -> RequestDescriptor + Send + 'static,
) -> impl Stream<Item = Result<T>> + Send + '_
where
    T: DeserializeOwned + Send + 'static,
{
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

    try_stream! {
        let mut cursor: Option<String> = None;
        let mut emitted: usize = 0;
        let mut pages_fetched: usize = 0;

        loop {
            if let Some(max_pages) = limits.max_pages {
                if pages_fetched >= max_pages {
                    return;
                }
            }

            let descriptor = build_page(cursor.clone(), page_size);
            let body = client.request(descriptor).await?;
            pages_fetched += 1;

            let page: CursorPage<T> = serde_json::from_slice(&body).map_err(|_| Error::UnexpectedResponse)?;
            let page_len = page.items.len();

            for item in page.items {
                if let Some(max_items) = limits.max_items {
                    if emitted >= max_items {
                        return;
                    }
                }
                emitted += 1;
                yield item;
            }

            match page.cursor_after {
                Some(next) if page_len > 0 => cursor = Some(next),
                _ => return,
            }
        }
    }
}

/// Builds the standard `limit`/`cursor_after` query pair for one cursor page.
pub fn cursor_page_descriptor(path: &str, cursor_after: Option<&str>, limit: u32) -> RequestDescriptor {
    let descriptor = RequestDescriptor::new(Method::Get, path).query_param("limit", limit.to_string());
    match cursor_after {
        Some(cursor) => descriptor.query_param("cursor_after", cursor),
        None => descriptor,
    }
}

/// Default page size used when a caller doesn't have a specific preference.
pub fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Builds the standard `limit`/`offset` query pair for one page.
pub fn offset_page_descriptor(path: &str, offset: u32, limit: u32) -> RequestDescriptor {
    RequestDescriptor::new(Method::Get, path)
        .query_param("limit", limit.to_string())
        .query_param("offset", offset.to_string())
}
