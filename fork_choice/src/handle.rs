use crate::multiview::MultiView;
use crate::view::View;
use anyhow::{anyhow, Result};
use containers::Hash32;
use tokio::sync::{mpsc, oneshot};

/// Commands consumed by the tracker task. Each carries a reply slot so the
/// caller observes state as of its own command's execution.
enum Command {
    AddView {
        view: View,
        reply: oneshot::Sender<bool>,
    },
    BestView {
        reply: oneshot::Sender<Option<View>>,
    },
    FinalView {
        reply: oneshot::Sender<Option<View>>,
    },
    ViewHashes {
        reply: oneshot::Sender<Vec<Hash32>>,
    },
    Finalize {
        hash: Hash32,
        reply: oneshot::Sender<bool>,
    },
    ClearBranch {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<MultiView>,
    },
}

/// Mailbox front-end for a [`MultiView`] running on its own task.
///
/// All reads and writes are executed strictly in arrival order by a single
/// consumer, so every caller observes best/final consistent with the most
/// recently accepted view at the time its command runs.
#[derive(Clone)]
pub struct MultiViewHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl MultiViewHandle {
    /// Move `inner` onto a dedicated task and return the handle. The task
    /// exits when the last handle is dropped.
    pub fn spawn(mut inner: MultiView) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::AddView { view, reply } => {
                        let _ = reply.send(inner.add_view(view));
                    }
                    Command::BestView { reply } => {
                        let _ = reply.send(inner.best_view().cloned());
                    }
                    Command::FinalView { reply } => {
                        let _ = reply.send(inner.final_view().cloned());
                    }
                    Command::ViewHashes { reply } => {
                        let _ = reply.send(inner.view_hashes());
                    }
                    Command::Finalize { hash, reply } => {
                        let _ = reply.send(inner.finalize_view(hash));
                    }
                    Command::ClearBranch { reply } => {
                        inner.clear_branch();
                        let _ = reply.send(());
                    }
                    Command::Snapshot { reply } => {
                        let _ = reply.send(inner.clone());
                    }
                }
            }
        });
        Self { tx }
    }

    pub async fn add_view(&self, view: View) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddView { view, reply })?;
        Ok(rx.await?)
    }

    pub async fn best_view(&self) -> Result<Option<View>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BestView { reply })?;
        Ok(rx.await?)
    }

    pub async fn final_view(&self) -> Result<Option<View>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FinalView { reply })?;
        Ok(rx.await?)
    }

    pub async fn view_hashes(&self) -> Result<Vec<Hash32>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ViewHashes { reply })?;
        Ok(rx.await?)
    }

    pub async fn finalize_view(&self, hash: Hash32) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Finalize { hash, reply })?;
        Ok(rx.await?)
    }

    pub async fn clear_branch(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClearBranch { reply })?;
        Ok(rx.await?)
    }

    /// Deep copy of the tracked state, for speculative simulate-add without
    /// touching the live tracker.
    pub async fn snapshot(&self) -> Result<MultiView> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        Ok(rx.await?)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("fork-choice tracker task is gone"))
    }
}
