//! # Connection Paginator
//!
//! Wraps an ordered candidate list into a cursor-paginated [`Connection`]:
//!
//! ```text
//! Connection<T> = { edges: [ { node: T, cursor, relationContext? } ],
//!                   pageInfo: { globalCount, hasNextPage, startCursor?, endCursor? } }
//! ```
//!
//! Connections are built fresh per query and never persisted.

pub mod cursor;

use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::model::RelationMeta;
use crate::{Error, Result};
pub use cursor::{decode_cursor, encode_cursor, offset_after};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge<T> {
    pub node: T,
    pub cursor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_context: Option<RelationMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Candidates before windowing.
    pub global_count: usize,
    pub has_next_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    pub fn empty() -> Self {
        Self { edges: Vec::new(), page_info: PageInfo::default() }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    pub fn into_nodes(self) -> Vec<T> {
        self.edges.into_iter().map(|e| e.node).collect()
    }

    /// Transform nodes, keeping cursors, context and page info.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Connection<U> {
        Connection {
            edges: self
                .edges
                .into_iter()
                .map(|e| Edge { node: f(e.node), cursor: e.cursor, relation_context: e.relation_context })
                .collect(),
            page_info: self.page_info,
        }
    }
}

/// Paginate bare nodes.
pub fn paginate<T>(raw: Vec<T>, offset: usize, limit: Option<usize>) -> Connection<T> {
    paginate_with_context(raw.into_iter().map(|n| (n, None)).collect(), offset, limit)
}

/// Paginate nodes that carry relation context.
///
/// `raw` is the full ordered candidate list; the edges are exactly the
/// window `[offset, offset + limit)`. `limit = None` takes the rest of the
/// list and never reports a next page.
pub fn paginate_with_context<T>(
    raw: Vec<(T, Option<RelationMeta>)>,
    offset: usize,
    limit: Option<usize>,
) -> Connection<T> {
    let global_count = raw.len();
    if global_count == 0 {
        return Connection::empty();
    }

    let edges: Vec<Edge<T>> = raw
        .into_iter()
        .enumerate()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(position, (node, relation_context))| Edge {
            node,
            cursor: encode_cursor(position),
            relation_context,
        })
        .collect();

    let has_next_page = limit.is_some_and(|l| offset.saturating_add(l) < global_count);
    let page_info = PageInfo {
        global_count,
        has_next_page,
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
    };
    Connection { edges, page_info }
}

/// Caller-facing window: `first` items after `after`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub first: Option<usize>,
    pub after: Option<String>,
}

impl PageRequest {
    pub fn first(first: usize) -> Self {
        Self { first: Some(first), after: None }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// Resolve to `(offset, limit)` under the configured page sizes.
    pub fn resolve(&self, config: &CoreConfig) -> Result<(usize, usize)> {
        let offset = match &self.after {
            Some(cursor) => offset_after(cursor)?,
            None => 0,
        };
        let limit = match self.first {
            Some(0) => return Err(Error::InvalidInput("first must be positive".into())),
            Some(n) if n > config.max_page_size => {
                return Err(Error::InvalidInput(format!(
                    "first {n} exceeds the maximum page size {}",
                    config.max_page_size
                )));
            }
            Some(n) => n,
            None => config.default_page_size,
        };
        Ok((offset, limit))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_input_is_empty_connection() {
        let conn: Connection<u32> = paginate(Vec::new(), 0, Some(10));
        assert!(conn.is_empty());
        assert_eq!(conn.page_info, PageInfo::default());
    }

    #[test]
    fn test_window_and_counts() {
        let conn = paginate((0..10).collect(), 3, Some(4));
        assert_eq!(conn.into_nodes(), vec![3, 4, 5, 6]);

        let conn = paginate((0..10).collect::<Vec<_>>(), 3, Some(4));
        assert_eq!(conn.page_info.global_count, 10);
        assert!(conn.page_info.has_next_page);
    }

    #[test]
    fn test_last_page_has_no_next() {
        let conn = paginate((0..10).collect::<Vec<_>>(), 8, Some(2));
        assert_eq!(conn.len(), 2);
        assert!(!conn.page_info.has_next_page);
    }

    #[test]
    fn test_unbounded_limit() {
        let conn = paginate((0..7).collect::<Vec<_>>(), 0, None);
        assert_eq!(conn.len(), 7);
        assert!(!conn.page_info.has_next_page);
    }

    #[test]
    fn test_offset_past_end() {
        let conn = paginate((0..3).collect::<Vec<_>>(), 10, Some(5));
        assert!(conn.is_empty());
        assert_eq!(conn.page_info.global_count, 3);
        assert!(!conn.page_info.has_next_page);
    }

    #[test]
    fn test_end_cursor_resumes_next_page() {
        let config = CoreConfig::default();
        let first = paginate((0..5).collect::<Vec<_>>(), 0, Some(2));
        let end = first.page_info.end_cursor.clone().unwrap();
        let (offset, limit) = PageRequest::first(2).after(end).resolve(&config).unwrap();
        let second = paginate((0..5).collect::<Vec<_>>(), offset, Some(limit));
        assert_eq!(second.into_nodes(), vec![2, 3]);
    }

    #[test]
    fn test_page_request_bounds() {
        let config = CoreConfig::default();
        assert_eq!(PageRequest::default().resolve(&config).unwrap(), (0, 25));
        assert!(PageRequest::first(0).resolve(&config).is_err());
        assert!(PageRequest::first(501).resolve(&config).is_err());
    }
}
