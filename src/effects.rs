//! Background side-effect runner.
//!
//! Alarm playback and SMS delivery must never stall the frame loop, so
//! they run on a dedicated worker thread fed through a channel. Jobs are
//! fire-and-forget; a job that fails logs and is dropped.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct EffectRunner {
    tx: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl EffectRunner {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("sitewatch-effects".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .ok();
        Self { tx, worker }
    }

    /// Queue a job. Never blocks; if the worker is gone the job is dropped
    /// with a log line, since alerts themselves were already persisted.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            log::warn!("effect worker unavailable, dropping side-effect job");
        }
    }
}

impl Drop for EffectRunner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued jobs and exit.
        let (tx, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.tx, tx));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
