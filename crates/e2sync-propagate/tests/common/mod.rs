//! Shared harness: a sync root and temp dir on disk, an in-memory folder
//! server, a virtual clock and a listener recording every notification.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use e2sync_core::{FinalizedUpload, UploadContext};
use e2sync_crypto::MasterKey;
use e2sync_propagate::{
    EncryptedUpload, ManualClock, MemoryFolderServer, Step, UploadError, UploadListener,
    UploadSettings,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Finalized(FinalizedUpload),
    NotEncrypted(String),
    Failed(Step),
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl UploadListener for Recorder {
    fn on_finalized(&self, _ctx: &UploadContext, upload: &FinalizedUpload) {
        self.push(Event::Finalized(upload.clone()));
    }

    fn on_not_encrypted(&self, ctx: &UploadContext) {
        self.push(Event::NotEncrypted(ctx.remote_path.clone()));
    }

    fn on_failed(&self, _ctx: &UploadContext, error: &UploadError) {
        self.push(Event::Failed(error.step));
    }
}

pub struct Harness {
    pub root: TempDir,
    pub temp: TempDir,
    pub server: MemoryFolderServer,
    pub clock: ManualClock,
    pub recorder: Arc<Recorder>,
    pub master: Arc<MasterKey>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            temp: TempDir::new().unwrap(),
            server: MemoryFolderServer::new(),
            clock: ManualClock::new(),
            recorder: Arc::new(Recorder::default()),
            master: Arc::new(MasterKey::from_bytes([0x42; 32])),
        }
    }

    /// Write a plaintext file under the sync root at `remote_path`.
    pub fn write_file(&self, remote_path: &str, contents: &[u8]) {
        let path = self.root.path().join(remote_path.trim_start_matches('/'));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp.path()
    }

    pub fn upload(&self, remote_path: &str) -> EncryptedUpload<'_, MemoryFolderServer, ManualClock> {
        let settings = UploadSettings {
            temp_dir: self.temp.path().to_path_buf(),
            ..Default::default()
        };
        EncryptedUpload::new(
            &self.server,
            UploadContext::new(self.root.path(), remote_path),
            Arc::clone(&self.master),
            settings,
        )
        .with_clock(self.clock.clone())
        .with_listener(self.recorder.clone())
    }
}
