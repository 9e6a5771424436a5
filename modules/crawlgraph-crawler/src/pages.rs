use std::collections::VecDeque;

use async_trait::async_trait;

use crawlgraph_common::ResumeCursor;

use crate::traits::{PageIterator, SourceError};

/// One page of a cursor-paged listing. `end_cursor` fetches the following
/// page; `None` marks the last page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub end_cursor: Option<String>,
}

/// Fetches a single page starting after the given cursor (`None` = first page).
#[async_trait]
pub trait PageFetcher: Send + Sync {
    type Item: Send;

    async fn fetch(&self, after: Option<&str>) -> Result<Page<Self::Item>, SourceError>;
}

/// Where the next page comes from.
enum NextPage {
    First,
    After(String),
    End,
}

/// [`PageIterator`] over any [`PageFetcher`]. Holds one page in memory.
pub struct CursorPages<F: PageFetcher> {
    fetcher: F,
    buffer: VecDeque<F::Item>,
    /// Token that fetched the page in `buffer`; `None` for the first page.
    page_token: Option<String>,
    /// `total_index` at the start of the buffered page.
    page_start: u64,
    next: NextPage,
    /// Leading items of the next fetched page that an earlier run consumed.
    skip: u64,
    resumed_at: Option<ResumeCursor>,
    fetched: bool,
    total_index: u64,
}

impl<F: PageFetcher> CursorPages<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            buffer: VecDeque::new(),
            page_token: None,
            page_start: 0,
            next: NextPage::First,
            skip: 0,
            resumed_at: None,
            fetched: false,
            total_index: 0,
        }
    }
}

#[async_trait]
impl<F> PageIterator for CursorPages<F>
where
    F: PageFetcher,
{
    type Item = F::Item;

    fn checkpoint(&self) -> Option<ResumeCursor> {
        if !self.fetched {
            return self.resumed_at.clone();
        }
        if self.buffer.is_empty() {
            if let NextPage::After(token) = &self.next {
                return Some(ResumeCursor::new(token.clone(), self.total_index));
            }
        }
        let token = self
            .page_token
            .clone()
            .unwrap_or_else(|| ResumeCursor::FIRST_PAGE.to_string());
        Some(ResumeCursor::within_page(
            token,
            self.total_index,
            self.total_index - self.page_start,
        ))
    }

    fn total_index(&self) -> u64 {
        self.total_index
    }

    fn resume(&mut self, cursor: &ResumeCursor) -> Result<(), SourceError> {
        if self.fetched || self.resumed_at.is_some() {
            return Err(SourceError::InvalidCursor(
                "iterator already advanced".to_string(),
            ));
        }
        if cursor.end_cursor.is_empty() {
            return Err(SourceError::InvalidCursor("empty end cursor".to_string()));
        }
        if cursor.skip > cursor.count {
            return Err(SourceError::InvalidCursor(format!(
                "skip {} exceeds count {}",
                cursor.skip, cursor.count
            )));
        }
        self.next = if cursor.is_first_page() {
            NextPage::First
        } else {
            NextPage::After(cursor.end_cursor.clone())
        };
        self.skip = cursor.skip;
        self.total_index = cursor.count;
        self.resumed_at = Some(cursor.clone());
        Ok(())
    }

    async fn next_item(&mut self) -> Result<Option<F::Item>, SourceError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.total_index += 1;
                return Ok(Some(item));
            }

            let after = match &self.next {
                NextPage::End => return Ok(None),
                NextPage::First => None,
                NextPage::After(token) => Some(token.clone()),
            };
            let page = self.fetcher.fetch(after.as_deref()).await?;

            // A listing that shrank since the cursor was saved may hold fewer
            // items than were consumed from it.
            let skip = std::mem::take(&mut self.skip).min(page.items.len() as u64);
            self.fetched = true;
            self.page_token = after;
            self.page_start = self.total_index - skip;
            self.next = match page.end_cursor {
                Some(token) => NextPage::After(token),
                None => NextPage::End,
            };
            self.buffer.extend(page.items.into_iter().skip(skip as usize));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pages of `size` over `0..len`, cursor = offset as text.
    struct Numbers {
        len: u32,
        size: u32,
    }

    #[async_trait]
    impl PageFetcher for Numbers {
        type Item = u32;

        async fn fetch(&self, after: Option<&str>) -> Result<Page<u32>, SourceError> {
            let start: u32 = match after {
                None => 0,
                Some(t) => t
                    .parse()
                    .map_err(|_| SourceError::InvalidCursor(t.to_string()))?,
            };
            let end = (start + self.size).min(self.len);
            Ok(Page {
                items: (start..end).collect(),
                end_cursor: (end < self.len).then(|| end.to_string()),
            })
        }
    }

    async fn drain(pages: &mut CursorPages<Numbers>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(n) = pages.next_item().await.unwrap() {
            out.push(n);
        }
        out
    }

    #[tokio::test]
    async fn checkpoint_tracks_the_exact_position() {
        let mut pages = CursorPages::new(Numbers { len: 10, size: 4 });
        assert_eq!(pages.checkpoint(), None);

        pages.next_item().await.unwrap();
        assert_eq!(
            pages.checkpoint(),
            Some(ResumeCursor::within_page(ResumeCursor::FIRST_PAGE, 1, 1))
        );
        for _ in 0..3 {
            pages.next_item().await.unwrap();
        }
        assert_eq!(pages.checkpoint(), Some(ResumeCursor::new("4", 4)));

        pages.next_item().await.unwrap();
        assert_eq!(pages.checkpoint(), Some(ResumeCursor::within_page("4", 5, 1)));
    }

    #[tokio::test]
    async fn drained_last_page_points_past_its_end() {
        let mut pages = CursorPages::new(Numbers { len: 6, size: 4 });
        let items = drain(&mut pages).await;
        assert_eq!(items, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(pages.checkpoint(), Some(ResumeCursor::within_page("4", 6, 2)));
        assert_eq!(pages.total_index(), 6);
    }

    #[tokio::test]
    async fn resume_continues_from_saved_position() {
        let mut pages = CursorPages::new(Numbers { len: 10, size: 4 });
        pages.resume(&ResumeCursor::new("8", 8)).unwrap();
        assert_eq!(pages.total_index(), 8);
        assert_eq!(drain(&mut pages).await, vec![8, 9]);
        assert_eq!(pages.total_index(), 10);
    }

    #[tokio::test]
    async fn resume_inside_a_page_skips_consumed_items() {
        let mut pages = CursorPages::new(Numbers { len: 10, size: 4 });
        pages
            .resume(&ResumeCursor::within_page(ResumeCursor::FIRST_PAGE, 3, 3))
            .unwrap();
        assert_eq!(
            pages.checkpoint(),
            Some(ResumeCursor::within_page(ResumeCursor::FIRST_PAGE, 3, 3))
        );
        assert_eq!(drain(&mut pages).await, (3..10).collect::<Vec<_>>());

        let mut pages = CursorPages::new(Numbers { len: 10, size: 4 });
        pages.resume(&ResumeCursor::within_page("4", 6, 2)).unwrap();
        assert_eq!(pages.next_item().await.unwrap(), Some(6));
        assert_eq!(pages.checkpoint(), Some(ResumeCursor::within_page("4", 7, 3)));
    }

    #[tokio::test]
    async fn skip_past_a_shrunken_page_moves_on() {
        let mut pages = CursorPages::new(Numbers { len: 6, size: 4 });
        pages.resume(&ResumeCursor::within_page("4", 9, 5)).unwrap();
        assert_eq!(pages.next_item().await.unwrap(), None);
    }

    #[tokio::test]
    async fn resume_rejected_after_first_fetch() {
        let mut pages = CursorPages::new(Numbers { len: 10, size: 4 });
        pages.next_item().await.unwrap();
        assert!(pages.resume(&ResumeCursor::new("4", 4)).is_err());
    }

    #[tokio::test]
    async fn empty_listing_is_exhausted_immediately() {
        let mut pages = CursorPages::new(Numbers { len: 0, size: 4 });
        assert_eq!(pages.next_item().await.unwrap(), None);
        assert_eq!(pages.next_item().await.unwrap(), None);
    }
}
