//! Channel history scraper.
//!
//! Pages backwards through a channel from the newest message to the oldest,
//! runs every message through [`LinkExtractor`] and produces link lines in
//! discovery order, framed by one begin and one end marker per channel.
//!
//! The scrape runs as its own task and hands lines to the consumer over a
//! bounded channel, so the file writer sees them in exactly the order they
//! were produced.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discord::{DiscordClient, Message, MAX_PAGE_SIZE};
use crate::links::LinkExtractor;
use crate::metrics;
use crate::output::{self, LinkSink};
use crate::{Error, Result};

/// Lines buffered between the scrape task and the writer.
const LINE_BUFFER: usize = 64;

/// Where message history comes from.
pub trait MessageSource: Send + Sync + 'static {
    /// Up to `limit` messages older than `before` (newest first), or the
    /// newest messages when `before` is `None`. An empty page means the
    /// history is exhausted.
    fn fetch_page(
        &self,
        channel_id: &str,
        limit: u8,
        before: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Human-readable channel name, if the source knows one.
    fn channel_name(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

impl MessageSource for DiscordClient {
    async fn fetch_page(
        &self,
        channel_id: &str,
        limit: u8,
        before: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.channel_messages(channel_id, limit, before).await
    }

    async fn channel_name(&self, channel_id: &str) -> Result<Option<String>> {
        Ok(self.channel(channel_id).await?.name)
    }
}

/// Parameters of one channel scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub channel_id: String,
    pub page_size: u8,
    pub poll_delay: Duration,
}

impl ScrapeRequest {
    pub fn new<S: Into<String>>(
        channel_id: S,
        page_size: u8,
        poll_delay: Duration,
    ) -> Result<Self> {
        let channel_id = channel_id.into().trim().to_string();
        if channel_id.is_empty() {
            return Err(Error::InvalidArgument("channel id is empty".to_string()));
        }
        // Channel ids are snowflakes and end up in the request path.
        if !channel_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidArgument(format!(
                "channel id must be numeric, got {:?}",
                channel_id
            )));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            )));
        }
        Ok(Self {
            channel_id,
            page_size,
            poll_delay,
        })
    }
}

/// What a finished scrape went through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub pages: usize,
    pub messages: usize,
    pub links: usize,
}

/// A scrape running in the background.
pub struct ChannelScrape {
    pub lines: mpsc::Receiver<String>,
    pub handle: JoinHandle<Result<ScrapeSummary>>,
}

impl ChannelScrape {
    /// Wait for the scrape task. Undelivered lines are discarded, which makes
    /// a still-running producer stop with [`Error::ChannelClosed`].
    pub async fn join(self) -> Result<ScrapeSummary> {
        let ChannelScrape { lines, handle } = self;
        drop(lines);
        handle.await.map_err(|e| Error::Task(e.to_string()))?
    }
}

pub fn begin_marker(channel_id: &str, channel_name: Option<&str>) -> String {
    format!("-----BEGIN CHANNEL {}-----", channel_label(channel_id, channel_name))
}

pub fn end_marker(channel_id: &str, channel_name: Option<&str>) -> String {
    format!("-----END CHANNEL {}-----", channel_label(channel_id, channel_name))
}

fn channel_label(channel_id: &str, channel_name: Option<&str>) -> String {
    match channel_name {
        Some(name) if !name.is_empty() => format!("{} (#{})", channel_id, name),
        _ => channel_id.to_string(),
    }
}

pub struct HistoryScraper<S> {
    source: Arc<S>,
    extractor: LinkExtractor,
    max_retries: u32,
}

impl<S> Clone for HistoryScraper<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            extractor: self.extractor.clone(),
            max_retries: self.max_retries,
        }
    }
}

impl<S: MessageSource> HistoryScraper<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            extractor: LinkExtractor::new(),
            max_retries: 0,
        }
    }

    /// Retry transient fetch failures up to `max_retries` times per page.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Start scraping on a separate task. Lines arrive on the returned
    /// receiver; the channel closes when the scrape ends, successfully or not.
    pub fn spawn(&self, request: ScrapeRequest) -> ChannelScrape {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let scraper = self.clone();
        let handle = tokio::spawn(async move { scraper.scrape(&request, &tx).await });
        ChannelScrape { lines: rx, handle }
    }

    /// Scrape a channel and write every line to `sink` before returning.
    pub async fn scrape_into<W: Write>(
        &self,
        request: ScrapeRequest,
        sink: &mut LinkSink<W>,
    ) -> Result<ScrapeSummary> {
        let mut scrape = self.spawn(request);
        let written = output::drain(&mut scrape.lines, sink).await;
        let summary = scrape.join().await;
        written?;
        summary
    }

    /// Run the whole pagination loop, sending lines to `lines`.
    pub async fn scrape(
        &self,
        request: &ScrapeRequest,
        lines: &mpsc::Sender<String>,
    ) -> Result<ScrapeSummary> {
        let channel_id = request.channel_id.as_str();

        let channel_name = match self.source.channel_name(channel_id).await {
            Ok(name) => name,
            Err(err) => {
                warn!(channel = channel_id, "Could not resolve channel name: {}", err);
                None
            }
        };
        info!(
            channel = channel_id,
            name = channel_name.as_deref().unwrap_or("?"),
            "Scraping channel"
        );

        let mut summary = ScrapeSummary {
            channel_id: channel_id.to_string(),
            channel_name: channel_name.clone(),
            ..Default::default()
        };

        // The begin marker waits for the first page so a failing first fetch
        // leaves nothing behind for this channel.
        let mut page = until_closed(lines, channel_id, self.fetch(request, None)).await?;
        send(lines, channel_id, begin_marker(channel_id, channel_name.as_deref())).await?;

        while !page.is_empty() {
            let mut cursor = None;
            let mut page_links = 0;
            for message in &page {
                for link in self.extractor.extract(message) {
                    send(lines, channel_id, link).await?;
                    page_links += 1;
                }
                cursor = Some(message.id.clone());
            }

            summary.pages += 1;
            summary.messages += page.len();
            summary.links += page_links;
            metrics::record_page(channel_id, page.len());
            metrics::record_links(channel_id, page_links);
            info!(
                channel = channel_id,
                messages_parsed = summary.messages,
                links_saved = summary.links,
                "Page processed"
            );

            page = until_closed(lines, channel_id, async {
                tokio::time::sleep(request.poll_delay).await;
                self.fetch(request, cursor.as_deref()).await
            })
            .await?;
        }

        send(lines, channel_id, end_marker(channel_id, channel_name.as_deref())).await?;
        info!(
            channel = channel_id,
            pages = summary.pages,
            messages = summary.messages,
            links = summary.links,
            "Finished channel"
        );

        Ok(summary)
    }

    async fn fetch(&self, request: &ScrapeRequest, before: Option<&str>) -> Result<Vec<Message>> {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = self
                .source
                .fetch_page(&request.channel_id, request.page_size, before)
                .await;
            metrics::record_fetch(started.elapsed());

            match result {
                Ok(page) => {
                    debug!(
                        channel = %request.channel_id,
                        before,
                        messages = page.len(),
                        oldest = ?page.last().and_then(|m| m.timestamp),
                        "Fetched page"
                    );
                    return Ok(page);
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let wait = match &err {
                        Error::RateLimited { retry_after } => {
                            (*retry_after).max(request.poll_delay)
                        }
                        _ => request.poll_delay,
                    };
                    warn!(
                        channel = %request.channel_id,
                        attempt,
                        max = self.max_retries,
                        "Fetch failed, retrying in {:?}: {}",
                        wait,
                        err
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Run `work` unless the consumer goes away first.
async fn until_closed<T>(
    lines: &mpsc::Sender<String>,
    channel_id: &str,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = work => result,
        _ = lines.closed() => Err(Error::ChannelClosed(channel_id.to_string())),
    }
}

async fn send(lines: &mpsc::Sender<String>, channel_id: &str, line: String) -> Result<()> {
    lines
        .send(line)
        .await
        .map_err(|_| Error::ChannelClosed(channel_id.to_string()))
}
