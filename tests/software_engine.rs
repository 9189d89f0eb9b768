// Full stack against a local HTTP server: software engine, views, command bus
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tiny_http::{Response, Server};
use webcell::engine::software::SoftwareEngine;
use webcell::{Context, SessionConfig, Viewport};

const NAVBAR: u32 = 40;
const SLOW_RESPONSE: Duration = Duration::from_secs(2);

struct Site {
    base: String,
    hits: mpsc::Receiver<String>,
}

impl Site {
    fn start() -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}", server.server_addr());
        let (tx, hits) = mpsc::channel();
        let next = format!("{}/next", base);
        std::thread::spawn(move || {
            for req in server.incoming_requests() {
                let path = req.url().to_string();
                let _ = tx.send(path.clone());
                let resp = match path.as_str() {
                    "/" => Response::from_string(
                        "<html><body><h1>Index</h1><a href=\"/next\">next page</a><p>body text</p></body></html>",
                    ),
                    "/next" => Response::from_string("<html><body><p>second page</p></body></html>"),
                    "/slow" => {
                        std::thread::sleep(SLOW_RESPONSE);
                        Response::from_string("<html><body><p>worth the wait</p></body></html>")
                    }
                    "/scripted" => Response::from_string(format!(
                        "<html><body><p>script</p><script>webcell_post_url_change({:?});</script></body></html>",
                        next
                    )),
                    _ => Response::from_string("gone").with_status_code(404),
                };
                let header = "Content-Type: text/html".parse::<tiny_http::Header>().unwrap();
                let _ = req.respond(resp.with_header(header));
            }
        });
        Self { base, hits }
    }

    fn wait_for(&self, ctx: &Context, path: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            ctx.tick();
            while let Ok(hit) = self.hits.try_recv() {
                if hit == path {
                    return true;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

fn session() -> (Context, i32, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = SessionConfig {
        viewport: Viewport { width: 320, height: 240 },
        navbar_height: NAVBAR,
        load_notify_delay_ms: 0,
        ..Default::default()
    };
    config.engine.cache_path = dir.path().join("cache");
    config.engine.frame_rate = 1000;
    let ctx = Context::new(config, Arc::new(SoftwareEngine::new())).expect("context");
    let handle = ctx.create_session().expect("session");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !ctx.is_ready(handle).unwrap() {
        assert!(Instant::now() < deadline, "content view never attached");
    }
    (ctx, handle, dir)
}

fn content_rows(frame: &[u8]) -> &[u8] {
    &frame[(NAVBAR * 320 * 4) as usize..]
}

fn pump(ctx: &Context, rounds: usize) {
    for _ in 0..rounds {
        ctx.tick();
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn loads_and_renders_a_page() {
    if std::env::var("CI").is_ok() {
        return;
    }
    let site = Site::start();
    let (ctx, handle, _dir) = session();
    pump(&ctx, 3);

    let blank = ctx.snapshot_rgba(handle).expect("both views painted");
    assert_eq!(blank.len(), 320 * 240 * 4);
    assert!(content_rows(&blank).iter().all(|b| *b == 255));

    ctx.set_url(handle, &format!("{}/", site.base)).unwrap();
    assert!(site.wait_for(&ctx, "/"));
    pump(&ctx, 5);
    let page = ctx.snapshot_rgba(handle).unwrap();
    assert!(content_rows(&page).chunks(4).any(|p| p != [255, 255, 255, 255]));
    ctx.shutdown();
}

#[test]
fn clicking_a_link_navigates() {
    if std::env::var("CI").is_ok() {
        return;
    }
    let site = Site::start();
    let (ctx, handle, _dir) = session();
    ctx.set_url(handle, &format!("{}/", site.base)).unwrap();
    assert!(site.wait_for(&ctx, "/"));
    pump(&ctx, 3);

    // The link is the block right under the heading.
    ctx.mouse_move(handle, 20, NAVBAR as i32 + 52).unwrap();
    ctx.mouse_set_state(handle, 0, true).unwrap();
    ctx.mouse_set_state(handle, 0, false).unwrap();
    assert!(site.wait_for(&ctx, "/next"));
    ctx.shutdown();
}

#[test]
fn page_scripts_reach_the_navigator() {
    if std::env::var("CI").is_ok() {
        return;
    }
    let site = Site::start();
    let (ctx, handle, _dir) = session();
    ctx.set_url(handle, &format!("{}/scripted", site.base)).unwrap();
    assert!(site.wait_for(&ctx, "/scripted"));
    assert!(site.wait_for(&ctx, "/next"));
    ctx.shutdown();
}

#[test]
fn http_errors_still_render() {
    if std::env::var("CI").is_ok() {
        return;
    }
    let site = Site::start();
    let (ctx, handle, _dir) = session();
    ctx.set_url(handle, &format!("{}/missing", site.base)).unwrap();
    assert!(site.wait_for(&ctx, "/missing"));
    pump(&ctx, 3);
    assert!(ctx.snapshot_rgba(handle).is_ok());

    // Unreachable hosts fall back to the error page.
    ctx.set_url(handle, "http://127.0.0.1:9/").unwrap();
    pump(&ctx, 20);
    let frame = ctx.snapshot_rgba(handle).unwrap();
    assert!(content_rows(&frame).chunks(4).any(|p| p != [255, 255, 255, 255]));
    ctx.shutdown();
}

#[test]
fn slow_pages_do_not_stall_the_tick() {
    if std::env::var("CI").is_ok() {
        return;
    }
    let site = Site::start();
    let (ctx, handle, _dir) = session();
    pump(&ctx, 3);
    ctx.set_url(handle, &format!("{}/slow", site.base)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut slowest = Duration::ZERO;
    let mut rendered = false;
    while !rendered && Instant::now() < deadline {
        let started = Instant::now();
        ctx.tick();
        slowest = slowest.max(started.elapsed());
        rendered = ctx
            .snapshot_rgba(handle)
            .map(|f| content_rows(&f).chunks(4).any(|p| p != [255, 255, 255, 255]))
            .unwrap_or(false);
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(rendered, "slow page never rendered");
    assert!(slowest < SLOW_RESPONSE / 4, "a tick took {:?}", slowest);
    ctx.shutdown();
}

#[test]
fn navbar_back_button_navigates_the_content() {
    if std::env::var("CI").is_ok() {
        return;
    }
    let site = Site::start();
    let (ctx, handle, _dir) = session();
    ctx.set_url(handle, &format!("{}/", site.base)).unwrap();
    assert!(site.wait_for(&ctx, "/"));
    ctx.set_url(handle, &format!("{}/next", site.base)).unwrap();
    assert!(site.wait_for(&ctx, "/next"));
    pump(&ctx, 3);

    // The back button is the first toolbar button, top left of the bar.
    ctx.mouse_move(handle, 12, 12).unwrap();
    ctx.mouse_set_state(handle, 0, true).unwrap();
    ctx.mouse_set_state(handle, 0, false).unwrap();
    assert!(site.wait_for(&ctx, "/"), "back button did not reload the previous page");
    ctx.shutdown();
}
