use std::collections::HashSet;
use std::future::Future;
use std::io::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Error, Result};
use flate2::read::GzDecoder;
use futures::{future, try_join, StreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tokio::runtime;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::{CrawlerConfig, OnError};
use crate::pipeline::{ItemPipelines, PipelineRegistry};
use crate::settings::Settings;
use crate::spider::{Item, ParseContext, Response, Spider, SpiderFactory};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Counters reported once a crawl is over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub requested: usize,
    pub downloaded: usize,
    pub download_errors: usize,
    pub parsed: usize,
    pub parse_errors: usize,
    pub items_scraped: usize,
    pub items_dropped: usize,
}

#[derive(Debug, Default)]
struct Counters {
    requested: AtomicUsize,
    downloaded: AtomicUsize,
    download_errors: AtomicUsize,
    parsed: AtomicUsize,
    parse_errors: AtomicUsize,
    items_scraped: AtomicUsize,
    items_dropped: AtomicUsize,
}

impl Counters {
    fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Every requested URL has either failed or been parsed.
    fn settled(&self) -> bool {
        // Completions are read before requests: a parsed page schedules its
        // links before being counted as parsed.
        let completed = self.download_errors.load(Ordering::SeqCst)
            + self.parsed.load(Ordering::SeqCst)
            + self.parse_errors.load(Ordering::SeqCst);
        completed == self.requested.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> CrawlStats {
        CrawlStats {
            requested: self.requested.load(Ordering::SeqCst),
            downloaded: self.downloaded.load(Ordering::SeqCst),
            download_errors: self.download_errors.load(Ordering::SeqCst),
            parsed: self.parsed.load(Ordering::SeqCst),
            parse_errors: self.parse_errors.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_dropped: self.items_dropped.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone)]
struct CountedTx {
    tx: mpsc::UnboundedSender<String>,
    counters: Arc<Counters>,
    seen: Option<Arc<Mutex<HashSet<String>>>>,
}

impl CountedTx {
    fn new(tx: mpsc::UnboundedSender<String>, counters: Arc<Counters>, dupefilter: bool) -> Self {
        let seen = dupefilter.then(|| Arc::new(Mutex::new(HashSet::new())));
        Self { tx, counters, seen }
    }

    fn send(&self, url: String) {
        if let Some(seen) = &self.seen {
            let fresh = seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.clone());
            if !fresh {
                log::trace!("Filtered duplicate URL: {url}");
                return;
            }
        }
        match self.tx.send(url) {
            Ok(()) => Counters::incr(&self.counters.requested),
            Err(e) => log::error!("Couldn't schedule URL: {e}"),
        }
    }
}

/// A crawl job: one spider type, its settings and its item pipelines.
pub struct Crawler {
    config: CrawlerConfig,
    settings: Settings,
    spider_factory: SpiderFactory,
    spider: Box<dyn Spider>,
    pipelines: ItemPipelines,
    client: reqwest::Client,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("config", &self.config)
            .field("spider", &self.spider.name())
            .field("pipelines", &self.pipelines)
            .finish()
    }
}

impl Crawler {
    /// Configures a crawler, instantiating the spider and every pipeline
    /// listed in the settings.
    pub fn new(
        settings: Settings,
        spider_factory: SpiderFactory,
        pipelines: &PipelineRegistry,
    ) -> Result<Self> {
        let config = CrawlerConfig::try_from(&settings)?;
        let spider = spider_factory(&settings)?;
        let pipelines = pipelines.build(&settings)?;
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .user_agent(config.user_agent.as_str())
            .build()?;

        log::debug!(
            "Crawler configured for spider {} with pipelines {:?}",
            spider.name(),
            pipelines
        );

        Ok(Self {
            config,
            settings,
            spider_factory,
            spider,
            pipelines,
            client,
        })
    }

    pub fn spider_name(&self) -> &str {
        self.spider.name()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn pipelines(&self) -> &ItemPipelines {
        &self.pipelines
    }

    /// Runs the crawl on a dedicated runtime, blocking until it is over.
    pub fn start(self) -> Result<CrawlStats> {
        let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
        rt.block_on(self.crawl())
    }

    pub async fn crawl(self) -> Result<CrawlStats> {
        let Crawler {
            config,
            settings,
            spider_factory,
            mut spider,
            mut pipelines,
            client,
        } = self;

        let spider_name = spider.name().to_string();
        let start_urls = spider.start_urls();
        log::info!("Spider {spider_name} opened with {} start URLs", start_urls.len());

        if let Err(e) = pipelines.open_spider(&spider_name) {
            spider.closed();
            log::error!("Spider {spider_name} closed: {e}");
            return Err(e);
        }

        let counters = Arc::new(Counters::default());
        let abort = Arc::new(AtomicBool::new(false));

        let (tx_stop, rx_stop) = crossbeam_channel::unbounded::<()>();
        let (tx_url, rx_url) = mpsc::unbounded_channel::<String>();
        let (tx_page, rx_page) = crossbeam_channel::bounded::<Response>(config.page_buffer);
        let (tx_item, rx_item) = crossbeam_channel::unbounded::<Item>();

        let tx_url = CountedTx::new(tx_url, counters.clone(), config.dupefilter);

        // Pipelines

        let pipeline_thread = {
            let counters = counters.clone();
            let abort = abort.clone();
            let on_item_error = config.on_item_error;
            thread::Builder::new()
                .name(String::from("pipelines"))
                .spawn(move || {
                    process_items(pipelines, rx_item, &counters, &abort, on_item_error)
                })?
        };

        // Workers

        let mut first_spider = Some(spider);
        let mut workers = vec![];
        for id in 0..config.num_workers {
            let rx_stop = rx_stop.clone();
            let rx_page = rx_page.clone();
            let tx_url = tx_url.clone();
            let tx_item = tx_item.clone();
            let counters = counters.clone();
            let abort = abort.clone();
            let settings = settings.clone();
            let spider_factory = spider_factory.clone();
            let spider = first_spider.take();
            let on_parse_error = config.on_parse_error;
            let worker = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || {
                    let mut spider = match spider.map(Ok).unwrap_or_else(|| spider_factory(&settings)) {
                        Ok(spider) => spider,
                        Err(e) => {
                            abort.store(true, Ordering::SeqCst);
                            return Err(e);
                        }
                    };
                    let res = 'recv: loop {
                        crossbeam_channel::select! {
                            recv(rx_page) -> page => {
                                let response = match page {
                                    Ok(response) => response,
                                    Err(_) => break 'recv Ok(()),
                                };
                                let url = response.url.clone();
                                let mut ctx = ParseContext::new(&url);
                                match spider.parse(response, &mut ctx) {
                                    Ok(()) => {
                                        let (requests, items) = ctx.into_output();
                                        requests.into_iter().for_each(|url| tx_url.send(url));
                                        for item in items {
                                            tx_item.send(item).ok();
                                        }
                                        Counters::incr(&counters.parsed);
                                    }
                                    Err(e) => {
                                        Counters::incr(&counters.parse_errors);
                                        match on_parse_error {
                                            OnError::SkipAndLog => {
                                                log::error!("Skipping parse for page {url} got: {e}");
                                            }
                                            OnError::Fail => {
                                                abort.store(true, Ordering::SeqCst);
                                                break 'recv Err(anyhow!("Couldn't parse {url} got: {e}"));
                                            }
                                        }
                                    }
                                }
                            },
                            recv(rx_stop) -> _ => break 'recv Ok(()),
                        }
                    };
                    spider.closed();
                    res
                })?;
            workers.push(worker);
        }
        drop(tx_item);
        drop(rx_page);
        drop(rx_stop);

        let workers = async move {
            tokio::task::spawn_blocking(|| {
                for w in workers {
                    w.join().map_err(|_| anyhow!("Worker thread panicked"))??;
                }
                Ok::<(), Error>(())
            })
            .await?
        };

        // Downloader

        let downloader = {
            let counters = counters.clone();
            let abort = abort.clone();
            let client = client.clone();
            let delay = config.download_delay();
            let concurrent_requests = config.concurrent_requests;
            let on_download_error = config.on_download_error;
            async move {
                let client = &client;
                let counters = &counters;
                let stream = UnboundedReceiverStream::new(rx_url)
                    .then(move |url| async move {
                        if let Some(delay) = delay {
                            sleep(delay).await;
                        }
                        url
                    })
                    .map(|url| async move {
                        match download(client, &url).await {
                            Ok(page) => {
                                Counters::incr(&counters.downloaded);
                                Ok(page)
                            }
                            Err(e) => {
                                Counters::incr(&counters.download_errors);
                                Err(anyhow!("Couldn't download {url} got: {e}"))
                            }
                        }
                    })
                    .buffer_unordered(concurrent_requests);

                match on_download_error {
                    OnError::Fail => {
                        let mut err = Ok::<(), Error>(());
                        stream
                            .scan(&mut err, until_err)
                            .map(|page| tx_page.send(page).ok())
                            .collect::<Vec<_>>()
                            .await;
                        if err.is_err() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        err
                    }
                    OnError::SkipAndLog => {
                        stream
                            .filter_map(|dl| async move {
                                dl.map_err(|e| log::warn!("Skipping URL: {e}")).ok()
                            })
                            .map(|page| tx_page.send(page).ok())
                            .collect::<Vec<_>>()
                            .await;
                        Ok(())
                    }
                }
            }
        };

        // Seed

        start_urls.into_iter().for_each(|url| tx_url.send(url));
        drop(tx_url);

        // Run all tasks

        let done = {
            let counters = counters.clone();
            let abort = abort.clone();
            let num_workers = config.num_workers;
            let handle_sigint = config.handle_sigint;
            async move {
                loop {
                    if handle_sigint {
                        if timeout(POLL_INTERVAL, tokio::signal::ctrl_c()).await.is_ok() {
                            abort.store(true, Ordering::SeqCst);
                            for _ in 0..num_workers {
                                tx_stop.send(()).ok();
                            }
                            return Err::<(), _>(anyhow!("Interrupted"));
                        }
                    } else {
                        sleep(POLL_INTERVAL).await;
                    }
                    if abort.load(Ordering::SeqCst) || counters.settled() {
                        for _ in 0..num_workers {
                            tx_stop.send(()).ok();
                        }
                        return Ok::<_, Error>(());
                    }
                }
            }
        };

        let res = try_join!(workers, downloader, done);
        let pipelines_res = tokio::task::spawn_blocking(move || {
            pipeline_thread
                .join()
                .map_err(|_| anyhow!("Pipeline thread panicked"))?
        })
        .await?;

        let stats = counters.snapshot();
        log::info!("Spider {spider_name} closed: {stats:?}");

        res?;
        pipelines_res?;

        Ok(stats)
    }
}

fn process_items(
    mut pipelines: ItemPipelines,
    rx_item: crossbeam_channel::Receiver<Item>,
    counters: &Counters,
    abort: &AtomicBool,
    on_item_error: OnError,
) -> Result<()> {
    let mut failure = None;
    for item in rx_item {
        if failure.is_some() {
            continue;
        }
        match pipelines.process_item(item) {
            Ok(Some(_)) => Counters::incr(&counters.items_scraped),
            Ok(None) => Counters::incr(&counters.items_dropped),
            Err(e) => {
                Counters::incr(&counters.items_dropped);
                match on_item_error {
                    OnError::SkipAndLog => log::error!("Skipping item got: {e}"),
                    OnError::Fail => {
                        abort.store(true, Ordering::SeqCst);
                        failure = Some(e);
                    }
                }
            }
        }
    }

    let closed = pipelines.close_spider();
    match failure {
        Some(e) => Err(e),
        None => closed,
    }
}

async fn download(client: &reqwest::Client, url: &str) -> Result<Response> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let status = resp.status().as_u16();
    let final_url = resp.url().to_string();

    let body = match resp.headers().get(CONTENT_TYPE) {
        Some(c) if c == "application/x-gzip" || c == "application/gzip" => {
            let compressed = resp.bytes().await?;
            let mut gz = GzDecoder::new(&compressed[..]);
            let mut body = String::new();
            gz.read_to_string(&mut body)?;
            body
        }
        _ => resp.text().await?,
    };

    Ok(Response::new(final_url, status, body))
}

fn until_err<T, E>(
    err: &mut &mut Result<(), E>,
    item: Result<T, E>,
) -> impl Future<Output = Option<T>> {
    match item {
        Ok(item) => future::ready(Some(item)),
        Err(e) => {
            **err = Err(e);
            future::ready(None)
        }
    }
}
