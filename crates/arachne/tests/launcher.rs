use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Mutex;
use std::thread;

use arachne::arachne_crawler::serde_json::{self, json, Value};
use arachne::arachne_crawler::SettingsMap;
use arachne::{AppConfig, Launcher, LogConfig};

// The logger is process-wide
static LOGGER: Mutex<()> = Mutex::new(());

/// Serves two linked pages over plain HTTP/1.1, anything else is a 404.
fn serve() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            let mut buf = [0; 4096];
            let n = stream.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]);
            let body = match request.split_whitespace().nth(1) {
                Some("/") => Some(
                    r#"<html><head><title>Home</title></head>
                    <body><a href="/about">About</a> <a href="https://other.org/">Other</a></body></html>"#,
                ),
                Some("/about") => Some(
                    r#"<html><head><title>About, us</title></head>
                    <body><a href="/">Home</a></body></html>"#,
                ),
                _ => None,
            };
            let response = match body {
                Some(body) => format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                ),
                None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into(),
            };
            stream.write_all(response.as_bytes()).ok();
        }
    });
    format!("http://{addr}")
}

fn map(value: Value) -> SettingsMap {
    value.as_object().cloned().unwrap()
}

#[test]
fn crawl_and_export() {
    let _lock = LOGGER.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = tempfile::tempdir().unwrap();
    let root = serve();

    let app = AppConfig {
        scrapy_settings: map(json!({
            "EXPORT_DIR": tmp.path().join("exports"),
            "HANDLE_SIGINT": false,
            "CONCURRENT_REQUESTS": 2,
            "TITLE_SPIDER": { "start_urls": [], "follow_links": false },
        })),
        export_json: true,
        export_csv: true,
        debug: false,
        spider_settings: vec![],
        log_dir: tmp.path().join("logs"),
    };
    let spider_settings = map(json!({
        "TITLE_SPIDER": { "start_urls": [format!("{root}/")], "follow_links": true },
        "ONLY_FOR_SPIDER": true,
    }));

    let stats = Launcher::new()
        .start_crawler(
            "arachne.spiders.TitleSpider",
            &app,
            &spider_settings,
            &LogConfig::from(&app),
        )
        .unwrap();
    assert_eq!(2, stats.requested);
    assert_eq!(2, stats.parsed);
    assert_eq!(2, stats.items_scraped);

    let json = fs_err::read_to_string(tmp.path().join("exports/json/title.json")).unwrap();
    let items: Vec<Value> = serde_json::from_str(&json).unwrap();
    let titles = items
        .iter()
        .map(|item| item["title"].as_str().unwrap().to_string())
        .collect::<HashSet<_>>();
    assert_eq!(
        HashSet::from(["Home".to_string(), "About, us".to_string()]),
        titles
    );

    let csv = fs_err::read_to_string(tmp.path().join("exports/csv/title.csv")).unwrap();
    let mut lines = csv.lines();
    assert_eq!(Some("title,url"), lines.next());
    let mut rows = lines.collect::<Vec<_>>();
    rows.sort_unstable();
    assert_eq!(
        vec![
            format!("\"About, us\",{root}/about"),
            format!("Home,{root}/"),
        ],
        rows
    );

    let log_dir = fs_err::read_dir(tmp.path().join("logs"))
        .unwrap()
        .flatten()
        .collect::<Vec<_>>();
    assert_eq!(1, log_dir.len());
    let logs = fs_err::read_to_string(log_dir[0].path()).unwrap();
    assert!(logs.contains("Starting spider title"), "{logs}");
}

#[test]
fn unknown_spider() {
    let _lock = LOGGER.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = tempfile::tempdir().unwrap();
    let log = LogConfig {
        debug: false,
        dir: tmp.path().to_path_buf(),
        ..Default::default()
    };

    let err = Launcher::new()
        .start_crawler(
            "myproject.spiders.Missing",
            &AppConfig::default(),
            &SettingsMap::new(),
            &log,
        )
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("myproject.spiders.Missing"), "{msg}");
    assert!(msg.contains("arachne.spiders.TitleSpider"), "{msg}");

    let logs = fs_err::read_to_string(log.log_file_path()).unwrap();
    assert!(
        logs.contains("ERROR: Couldn't launch myproject.spiders.Missing"),
        "{logs}"
    );
}

#[test]
fn invalid_settings_are_logged() {
    let _lock = LOGGER.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = tempfile::tempdir().unwrap();
    let log = LogConfig {
        debug: false,
        dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let app = AppConfig {
        scrapy_settings: map(json!({ "ITEM_PIPELINES": ["a.B"] })),
        ..Default::default()
    };

    let err = Launcher::new()
        .start_crawler("arachne.spiders.TitleSpider", &app, &SettingsMap::new(), &log)
        .unwrap_err()
        .to_string();
    assert!(err.contains("ITEM_PIPELINES"), "{err}");

    let logs = fs_err::read_to_string(log.log_file_path()).unwrap();
    assert!(logs.contains("ITEM_PIPELINES must be a mapping"), "{logs}");
}

#[test]
fn create_crawler_object_with_merged_settings() {
    let app = AppConfig {
        scrapy_settings: map(json!({ "USER_AGENT": "tests" })),
        export_json: true,
        ..Default::default()
    };
    let settings = arachne::get_spider_settings(&app, &SettingsMap::new()).unwrap();

    let crawler = Launcher::new()
        .create_crawler_object("arachne.spiders.TitleSpider", settings)
        .unwrap();
    assert_eq!("title", crawler.spider_name());
    assert_eq!("tests", crawler.config().user_agent);
    assert_eq!(
        vec!["arachne.pipelines.ExportJSON"],
        crawler.pipelines().identifiers().collect::<Vec<_>>()
    );
}
