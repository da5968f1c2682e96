#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use sniplette_core::config::RunOptions;
use sniplette_core::discovery::Toolchain;
use sniplette_core::progress::{JobId, JobResult, LogLine, Reporter, Stage, Update};

pub const VIDEO_ID: &str = "Cl1pId";
pub const UPLOADER: &str = "clip.maker";

/// Temp tree for one test: fake tools, output dir and temp root.
pub struct Sandbox {
    pub root: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create sandbox");
        for dir in ["bin", "out", "tmp"] {
            fs::create_dir_all(root.path().join(dir)).expect("create sandbox dir");
        }
        Self { root }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    pub fn out_dir(&self) -> PathBuf {
        self.path("out")
    }

    pub fn temp_root(&self) -> PathBuf {
        self.path("tmp")
    }

    /// Marker a fake tool touches whenever it runs.
    pub fn marker(&self, tool: &str) -> PathBuf {
        self.path(&format!("{tool}.ran"))
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            out_dir: self.out_dir(),
            temp_root: Some(self.temp_root()),
            ..Default::default()
        }
    }

    pub fn toolchain(&self, downloader: PathBuf, encoder: PathBuf) -> Toolchain {
        Toolchain {
            downloader,
            encoder: Some(encoder),
        }
    }

    pub fn temp_entries(&self) -> Vec<PathBuf> {
        fs::read_dir(self.temp_root())
            .map(|rd| rd.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }

    /// Downloader that prints `metadata` for `--dump-json` and otherwise
    /// writes `{id}.mp4` to the `-o` template with two progress lines.
    pub fn fake_downloader(&self, metadata: &str) -> PathBuf {
        let meta_path = self.path("bin/meta.json");
        fs::write(&meta_path, metadata).expect("write metadata");
        let body = format!(
            r#"touch '{marker}'
mode=download
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --dump-json) mode=meta ;;
    -o) shift; out="$1" ;;
  esac
  shift
done
if [ "$mode" = meta ]; then
  cat '{meta}'
  exit 0
fi
file=$(printf '%s' "$out" | sed -e 's/%(id)s/{id}/' -e 's/%(ext)s/mp4/')
echo "[youtube] {id}: Downloading webpage"
echo "[download]  50.0% of 1.00MiB at 1.00MiB/s ETA 00:01"
echo "[download] 100% of 1.00MiB in 00:01"
printf 'media' > "$file""#,
            marker = self.marker("downloader").display(),
            meta = meta_path.display(),
            id = VIDEO_ID,
        );
        self.script("yt-dlp", &body)
    }

    /// Encoder writing `payload` to its last argument after a progress block.
    pub fn fake_encoder(&self, payload: &str) -> PathBuf {
        let body = format!(
            r#"touch '{marker}'
for a; do out="$a"; done
printf 'out_time_ms=15000000\nspeed=3.1x\nprogress=continue\n'
printf 'out_time_ms=30000000\nprogress=end\n'
printf '%s' '{payload}' > "$out""#,
            marker = self.marker("encoder").display(),
        );
        self.script("ffmpeg", &body)
    }

    /// Encoder that leaves a partial output and fails.
    pub fn failing_encoder(&self) -> PathBuf {
        let body = format!(
            r#"touch '{marker}'
for a; do out="$a"; done
printf 'partial' > "$out"
echo "Error while filtering: Invalid argument" >&2
echo "Conversion failed!" >&2
exit 1"#,
            marker = self.marker("encoder").display(),
        );
        self.script("ffmpeg", &body)
    }

    /// Encoder that writes a partial output and then hangs until killed.
    pub fn stalling_encoder(&self) -> PathBuf {
        let body = format!(
            r#"touch '{marker}'
for a; do out="$a"; done
printf 'partial' > "$out"
sleep 30"#,
            marker = self.marker("encoder").display(),
        );
        self.script("ffmpeg", &body)
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(&format!("bin/{name}"));
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
        }
        path
    }
}

/// A `--dump-json` payload for a 30 s landscape clip.
pub fn metadata_json(title: &str) -> String {
    serde_json::json!({
        "id": VIDEO_ID,
        "title": title,
        "uploader": UPLOADER,
        "duration": 30.0,
        "width": 1920,
        "height": 1080,
        "description": "original caption text",
    })
    .to_string()
}

#[derive(Debug, Clone)]
pub enum Event {
    Update(Update),
    Log(LogLine),
    Result(JobResult),
}

/// Records every event in arrival order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn results(&self) -> Vec<JobResult> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Result(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn updates_for(&self, id: JobId) -> Vec<Update> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Update(u) if u.job_id == id => Some(u),
                _ => None,
            })
            .collect()
    }

    /// Non-decreasing stages, one terminal update, one result, nothing after.
    pub fn assert_lifecycle(&self, id: JobId) {
        let mine: Vec<Event> = self
            .events()
            .into_iter()
            .filter(|e| match e {
                Event::Update(u) => u.job_id == id,
                Event::Log(l) => l.job_id == id,
                Event::Result(r) => r.job_id == id,
            })
            .collect();
        let result_at = mine
            .iter()
            .position(|e| matches!(e, Event::Result(_)))
            .expect("job has a result");
        assert_eq!(result_at, mine.len() - 1, "events after result for {id}");

        let stages: Vec<Stage> = mine
            .iter()
            .filter_map(|e| match e {
                Event::Update(u) => Some(u.stage),
                _ => None,
            })
            .collect();
        assert!(
            stages.windows(2).all(|w| w[0] <= w[1]),
            "stages went backwards for {id}: {stages:?}"
        );
        assert_eq!(
            stages.iter().filter(|s| s.is_terminal()).count(),
            1,
            "exactly one terminal update for {id}"
        );
    }
}

impl Reporter for Recorder {
    fn update(&self, update: Update) {
        self.events.lock().push(Event::Update(update));
    }
    fn log(&self, line: LogLine) {
        self.events.lock().push(Event::Log(line));
    }
    fn result(&self, result: JobResult) {
        self.events.lock().push(Event::Result(result));
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
