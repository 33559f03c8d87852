//! Uniform pagination over offset-based and token-based providers.
//!
//! A cursor is an immutable value: `advance` returns a new cursor and leaves
//! the receiver untouched, so retrying a page request from the same cursor
//! always asks the provider for the same page.

use serde::{Deserialize, Serialize};

use crate::model::{SessionId, SourceType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CursorPosition {
    /// Zero-based offset of the next page and the provider's page size.
    Offset { offset: usize, page_size: usize },
    /// Opaque provider-issued token. `None` means the first page.
    Token { token: Option<String> },
}

impl CursorPosition {
    pub fn first_offset(page_size: usize) -> Self {
        CursorPosition::Offset {
            offset: 0,
            page_size,
        }
    }

    pub fn first_token() -> Self {
        CursorPosition::Token { token: None }
    }

    /// 1-based page number for offset positions, used on the wire as `page`.
    pub fn page_number(&self) -> Option<usize> {
        match self {
            CursorPosition::Offset { offset, page_size } if *page_size > 0 => {
                Some(offset / page_size + 1)
            }
            _ => None,
        }
    }
}

/// How a provider ended one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEnd {
    /// More pages exist. Token providers hand back the token for the next
    /// page; offset providers leave it `None`.
    Next { token: Option<String> },
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    pub session_id: SessionId,
    pub source_type: SourceType,
    pub position: CursorPosition,
    pub exhausted: bool,
}

impl PaginationCursor {
    pub fn new(session_id: SessionId, source_type: SourceType, position: CursorPosition) -> Self {
        Self {
            session_id,
            source_type,
            position,
            exhausted: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Cursor for the page after the one that ended with `end`.
    pub fn advance(&self, end: &PageEnd) -> PaginationCursor {
        let mut next = self.clone();
        match end {
            PageEnd::Exhausted => next.exhausted = true,
            PageEnd::Next { token } => match &self.position {
                CursorPosition::Offset { offset, page_size } => {
                    next.position = CursorPosition::Offset {
                        offset: offset + page_size,
                        page_size: *page_size,
                    };
                }
                CursorPosition::Token { .. } => match token {
                    Some(token) => {
                        next.position = CursorPosition::Token {
                            token: Some(token.clone()),
                        };
                    }
                    // a token provider that hands back no token has nothing more
                    None => next.exhausted = true,
                },
            },
        }
        next
    }
}
