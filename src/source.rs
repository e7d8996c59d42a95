use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use http_cache_reqwest::{Cache, HttpCache, MokaCache, MokaManager};
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use rss::Channel;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::entry::RawEntry;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Produces the current entries of a feed, in feed order.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawEntry>>;
}

/// Fetches an RSS feed over HTTP.
pub struct HttpFeedSource {
    url: Url,
    http_client: ClientWithMiddleware,
}

impl HttpFeedSource {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let http_client = ClientBuilder::new(
            reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT.min(timeout))
                .read_timeout(READ_TIMEOUT.min(timeout))
                .timeout(timeout)
                .build()
                .context("could not create an HTTP client")?,
        )
        .with(Cache(HttpCache {
            mode: Default::default(),
            manager: MokaManager::new(MokaCache::builder().max_capacity(64).build()),
            options: Default::default(),
        }))
        .build();

        Ok(Self { url, http_client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[instrument(level = "DEBUG", skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<RawEntry>> {
        let response = self
            .http_client
            .get(self.url.clone())
            .send()
            .await
            .map_err(Into::into)
            .and_then(|r| r.error_for_status().context("server returned an error"))
            .with_context(|| anyhow!("could not fetch `{}`", self.url))?;
        let body = response.bytes().await.with_context(|| {
            anyhow!("could not read the response when fetching `{}`", self.url)
        })?;
        debug!(bytes = body.len(), "Received the feed");

        parse_channel(&body, OffsetDateTime::now_utc())
            .with_context(|| anyhow!("could not parse the feed at `{}`", self.url))
    }
}

/// Converts an RSS document into entries.
///
/// Entries without a publication date (or with a malformed one) are dated `retrieved`.
pub fn parse_channel(body: &[u8], retrieved: OffsetDateTime) -> Result<Vec<RawEntry>> {
    let channel = Channel::read_from(body).context("the document is not a valid RSS feed")?;
    let mut entries = Vec::with_capacity(channel.items().len());

    for (idx, item) in channel.items().iter().enumerate() {
        let idx = idx + 1;

        let Some(guid) = item
            .guid()
            .map(|guid| guid.value())
            .filter(|guid| !guid.trim().is_empty())
            .or(item.link().filter(|link| !link.trim().is_empty()))
        else {
            warn!("Item #{idx} has neither a guid nor a link; skipping");
            continue;
        };

        let pub_date = match item.pub_date() {
            Some(s) => match OffsetDateTime::parse(s.trim(), &Rfc2822) {
                Ok(date) => date,

                Err(e) => {
                    warn!(%guid, "Could not parse the publication date `{s}` of item #{idx}: {e}");
                    retrieved
                }
            },

            None => retrieved,
        };

        entries.push(RawEntry {
            title: item.title().unwrap_or_default().to_owned(),
            content: item
                .content()
                .or(item.description())
                .unwrap_or_default()
                .to_owned(),
            link: item.link().unwrap_or_default().to_owned(),
            pub_date,
            guid: guid.to_owned(),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const RETRIEVED: OffsetDateTime = datetime!(2024-06-01 15:00 UTC);

    fn feed(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0">
              <channel>
                <title>Rail Advisories</title>
                <link>https://www.njtransit.com</link>
                <description>Rail service advisories</description>
                {items}
              </channel>
            </rss>"#
        )
    }

    #[test]
    fn maps_items_in_feed_order() {
        let body = feed(
            r#"
            <item>
              <title>NEC Train 3857</title>
              <description>Train 3857 canceled due to NEC delays</description>
              <link>https://www.njtransit.com/node/1</link>
              <guid isPermaLink="false">advisory-1</guid>
              <pubDate>Sat, 01 Jun 2024 12:00:00 +0000</pubDate>
            </item>
            <item>
              <title>RVL Train 5412</title>
              <description>Running 10 minutes late</description>
              <link>https://www.njtransit.com/node/2</link>
              <guid isPermaLink="false">advisory-2</guid>
              <pubDate>Sat, 01 Jun 2024 11:30:00 +0000</pubDate>
            </item>"#,
        );

        let entries = parse_channel(body.as_bytes(), RETRIEVED).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].guid, "advisory-1");
        assert_eq!(entries[0].title, "NEC Train 3857");
        assert_eq!(entries[0].content, "Train 3857 canceled due to NEC delays");
        assert_eq!(entries[0].link, "https://www.njtransit.com/node/1");
        assert_eq!(entries[0].pub_date, datetime!(2024-06-01 12:00 UTC));
        assert_eq!(entries[1].guid, "advisory-2");
    }

    #[test]
    fn falls_back_to_the_link_as_guid() {
        let body = feed(
            r#"
            <item>
              <title>Advisory</title>
              <link>https://www.njtransit.com/node/3</link>
            </item>
            <item>
              <title>No identity</title>
            </item>"#,
        );

        let entries = parse_channel(body.as_bytes(), RETRIEVED).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].guid, "https://www.njtransit.com/node/3");
        assert_eq!(entries[0].content, "");
        assert_eq!(entries[0].pub_date, RETRIEVED);
    }

    #[test]
    fn blank_guid_falls_back_to_the_link() {
        let body = feed(
            r#"
            <item>
              <title>Advisory</title>
              <link>https://www.njtransit.com/node/9</link>
              <guid isPermaLink="false">   </guid>
            </item>
            <item>
              <title>Blank identity</title>
              <link> </link>
              <guid></guid>
            </item>"#,
        );

        let entries = parse_channel(body.as_bytes(), RETRIEVED).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].guid, "https://www.njtransit.com/node/9");
    }

    #[test]
    fn malformed_dates_use_the_retrieval_time() {
        let body = feed(
            r#"
            <item>
              <title>Advisory</title>
              <guid>advisory-4</guid>
              <pubDate>yesterday-ish</pubDate>
            </item>"#,
        );

        let entries = parse_channel(body.as_bytes(), RETRIEVED).unwrap();

        assert_eq!(entries[0].pub_date, RETRIEVED);
    }

    #[test]
    fn rejects_non_rss_documents() {
        assert!(parse_channel(b"<html><body>Maintenance</body></html>", RETRIEVED).is_err());
    }

    /// Answers a single HTTP request with `status` and `body`.
    async fn serve_once(status: &str, body: String) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/rss+xml\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        Url::parse(&format!("http://{addr}/rss/RailAdvisories_feed.xml")).unwrap()
    }

    fn one_item() -> String {
        feed(
            r#"
            <item>
              <title>Advisory</title>
              <guid>advisory-5</guid>
            </item>"#,
        )
    }

    #[tokio::test]
    async fn fetches_and_parses_the_feed() {
        let url = serve_once("200 OK", one_item()).await;
        let source = HttpFeedSource::new(url, Duration::from_secs(5)).unwrap();

        let entries = source.fetch().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].guid, "advisory-5");
    }

    #[tokio::test]
    async fn error_statuses_fail_the_fetch() {
        // The body is a valid feed, so only the status can reject it.
        let url = serve_once("503 Service Unavailable", one_item()).await;
        let source = HttpFeedSource::new(url, Duration::from_secs(5)).unwrap();

        let err = source.fetch().await.unwrap_err();

        assert!(format!("{err:#}").contains("server returned an error"), "{err:#}");
    }
}
