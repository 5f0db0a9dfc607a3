use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read as _;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// In-process stand-in for the upstream comic site and the media host's
/// upload endpoint.
pub struct StubSite {
    pub base_url: String,
    state: Arc<Mutex<SiteState>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
struct SiteState {
    comics: BTreeMap<String, StubComic>,
    failing: HashSet<String>,
    flaky: HashMap<String, usize>,
    rejected_uploads: Vec<String>,
    empty_chapters: HashSet<String>,
    hits: HashMap<String, usize>,
}

struct StubComic {
    title: String,
    chapters: Vec<String>,
    pages_per_chapter: usize,
}

const UPLOAD_PATH: &str = "/v1_1/demo/image/upload";

#[allow(dead_code)]
impl StubSite {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub site");
        let base_url = format!("http://{}", server.server_addr());
        let state = Arc::new(Mutex::new(SiteState::default()));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_state = Arc::clone(&state);
        let thread_base = base_url.clone();
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().split('?').next().unwrap_or("/").to_owned();
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);

                let (status, text) = {
                    let mut state = thread_state.lock().expect("stub state lock");
                    *state.hits.entry(path.clone()).or_default() += 1;
                    state.respond(&thread_base, &path, &body)
                };
                let _ = request.respond(tiny_http::Response::from_string(text).with_status_code(status));
            }
        });

        Self {
            base_url,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn add_comic(&self, slug: &str, title: &str, chapters: &[&str]) {
        self.lock().comics.insert(
            slug.to_owned(),
            StubComic {
                title: title.to_owned(),
                chapters: chapters.iter().map(|key| (*key).to_owned()).collect(),
                pages_per_chapter: 2,
            },
        );
    }

    pub fn add_chapter(&self, slug: &str, key: &str) {
        if let Some(comic) = self.lock().comics.get_mut(slug) {
            comic.chapters.push(key.to_owned());
        }
    }

    /// Every request to `path` answers 500.
    pub fn fail_path(&self, path: &str) {
        self.lock().failing.insert(path.to_owned());
    }

    /// The next `failures` requests to `path` answer 503.
    pub fn flaky_path(&self, path: &str, failures: usize) {
        self.lock().flaky.insert(path.to_owned(), failures);
    }

    /// The chapter page keeps its reader block but lists no images.
    pub fn empty_chapter(&self, slug: &str, key: &str) {
        self.lock()
            .empty_chapters
            .insert(StubSite::chapter_path(slug, key));
    }

    /// Uploads whose `file` contains `fragment` are rejected by the media host.
    pub fn reject_uploads_containing(&self, fragment: &str) {
        self.lock().rejected_uploads.push(fragment.to_owned());
    }

    pub fn hits(&self, path: &str) -> usize {
        self.lock().hits.get(path).copied().unwrap_or(0)
    }

    pub fn upload_hits(&self) -> usize {
        self.hits(UPLOAD_PATH)
    }

    pub fn comic_url(&self, slug: &str) -> String {
        format!("{}/manga/{slug}/", self.base_url)
    }

    pub fn chapter_path(slug: &str, key: &str) -> String {
        format!("/{slug}-chapter-{}/", key.replace('.', "-"))
    }

    pub fn image_url(&self, slug: &str, key: &str, page: usize) -> String {
        format!("{}/img/{slug}/{key}/{page}.jpg", self.base_url)
    }

    pub fn cloudinary_base(&self) -> String {
        format!("{}/v1_1", self.base_url)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.state.lock().expect("stub state lock")
    }
}

impl SiteState {
    fn respond(&mut self, base_url: &str, path: &str, body: &str) -> (u16, String) {
        if self.failing.contains(path) {
            return (500, "internal error".to_owned());
        }
        if let Some(remaining) = self.flaky.get_mut(path)
            && *remaining > 0
        {
            *remaining -= 1;
            return (503, "try again".to_owned());
        }

        if path == UPLOAD_PATH {
            return self.upload(body);
        }
        if let Some(slug) = path
            .strip_prefix("/manga/")
            .map(|rest| rest.trim_end_matches('/'))
        {
            return match self.comics.get(slug) {
                Some(comic) => (200, landing_page(slug, comic)),
                None => (404, "no such comic".to_owned()),
            };
        }
        if path.starts_with("/img/") {
            return (200, "jpeg bytes".to_owned());
        }
        for (slug, comic) in &self.comics {
            for key in &comic.chapters {
                if path == StubSite::chapter_path(slug, key) {
                    let pages = if self.empty_chapters.contains(path) {
                        0
                    } else {
                        comic.pages_per_chapter
                    };
                    return (200, chapter_page(base_url, slug, key, pages));
                }
            }
        }
        (404, "not found".to_owned())
    }

    fn upload(&self, body: &str) -> (u16, String) {
        let form: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        let (Some(file), Some(public_id)) = (form.get("file"), form.get("public_id")) else {
            return (400, r#"{"error":{"message":"missing file or public_id"}}"#.to_owned());
        };
        if !form.contains_key("signature") || form.get("api_key").map(String::as_str) != Some("key") {
            return (401, r#"{"error":{"message":"unsigned upload"}}"#.to_owned());
        }
        if self.rejected_uploads.iter().any(|fragment| file.contains(fragment)) {
            return (400, r#"{"error":{"message":"resource not found"}}"#.to_owned());
        }
        (
            200,
            serde_json::json!({
                "public_id": public_id,
                "secure_url": format!("https://res.cloudinary.test/demo/{public_id}.jpg"),
            })
            .to_string(),
        )
    }
}

fn landing_page(slug: &str, comic: &StubComic) -> String {
    let rows: String = comic
        .chapters
        .iter()
        .rev()
        .map(|key| {
            format!(
                "<tr><td class=\"judulseries\"><a href=\"{}\">Chapter {key}</a></td></tr>\n",
                StubSite::chapter_path(slug, key)
            )
        })
        .collect();
    format!(
        r#"<!doctype html>
<html>
  <body>
    <div id="Judul"><h1 class="judul">{title}</h1></div>
    <div class="ims"><img src="/img/{slug}/cover.jpg"></div>
    <p class="desc">Synopsis of {title}.</p>
    <table class="inftable">
      <tr><td>Jenis Komik</td><td>Manhwa</td></tr>
      <tr><td>Pengarang</td><td>Stub Author</td></tr>
    </table>
    <ul class="genre"><li><a>Action</a></li><li><a>Drama</a></li></ul>
    <table id="Daftar_Chapter">
{rows}    </table>
  </body>
</html>
"#,
        title = comic.title,
    )
}

fn chapter_page(base_url: &str, slug: &str, key: &str, pages: usize) -> String {
    let images: String = (1..=pages)
        .map(|page| format!("<img src=\"{base_url}/img/{slug}/{key}/{page}.jpg\">\n"))
        .collect();
    format!(
        r#"<!doctype html>
<html>
  <body>
    <div id="Baca_Komik">
      <img src="{base_url}/asset/lazy.jpg">
{images}    </div>
  </body>
</html>
"#
    )
}

impl Drop for StubSite {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
