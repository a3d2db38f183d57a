//! Cancellation scopes for the simulator's tasks

use futures::{
    channel::oneshot,
    future::{BoxFuture, FusedFuture, Shared},
    FutureExt,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// Future that resolves once its scope is cancelled.
///
/// Scopes form a tree. The root scope spans the whole simulator and is
/// cancelled exactly once, at teardown; [`child`](Self::child) derives the
/// scopes handed to in-flight work. A child ends when its parent ends, when
/// its own [`Signal`] fires or is dropped, or once an optional deadline runs
/// out, whichever comes first. Cloning shares the same scope.
#[derive(Clone)]
pub struct Shutdown {
    inner: Shared<BoxFuture<'static, ()>>,
}

// === impl Shutdown ===

impl Shutdown {
    fn new(scope: impl Future<Output = ()> + Send + 'static) -> Self {
        Self { inner: scope.boxed().shared() }
    }

    /// Derives a scope that ends with this one, with the returned signal, or
    /// after `deadline`, whichever comes first.
    ///
    /// The signal doubles as the scope's guard: dropping it cancels the
    /// child, so holding it across an operation ties every task forked under
    /// the child to that operation's lifetime.
    pub fn child(&self, deadline: Option<Duration>) -> (Signal, Shutdown) {
        let (sender, receiver) = oneshot::channel();
        let parent = self.clone();
        let scope = async move {
            let own = receiver.map(drop);
            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = parent => {}
                        _ = own => {}
                        _ = tokio::time::sleep(deadline) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = parent => {}
                        _ = own => {}
                    }
                }
            }
        };
        (Signal(sender), Self::new(scope))
    }

    /// Non-blocking check used by scheduler loops between ticks.
    pub fn fired(&self) -> bool {
        self.inner.peek().is_some() || self.inner.is_terminated()
    }
}

impl Future for Shutdown {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pin = self.get_mut();
        if pin.inner.is_terminated() || pin.inner.poll_unpin(cx).is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Cancels one scope, either explicitly or by being dropped.
pub struct Signal(oneshot::Sender<()>);

// === impl Signal ===

impl Signal {
    /// Cancels the scope now.
    pub fn fire(self) -> Result<(), ()> {
        self.0.send(())
    }
}

/// Creates the root scope of a simulator instance.
pub fn signal() -> (Signal, Shutdown) {
    let (sender, receiver) = oneshot::channel();
    (Signal(sender), Shutdown::new(receiver.map(drop)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_root_scope_fires_for_every_clone() {
        let (signal, shutdown) = signal();
        let other = shutdown.clone();
        assert!(!shutdown.fired());

        signal.fire().unwrap();
        shutdown.await;
        other.await;
    }

    #[tokio::test]
    async fn dropping_the_signal_cancels_the_scope() {
        let (signal, shutdown) = signal();
        drop(signal);
        shutdown.await;
    }

    #[tokio::test]
    async fn children_end_with_their_parent() {
        let (signal, root) = signal();
        let (_guard, child) = root.child(None);
        assert!(!child.fired());

        signal.fire().unwrap();
        child.await;
    }

    #[tokio::test]
    async fn a_child_signal_leaves_the_parent_alone() {
        let (_root_signal, root) = signal();
        let (guard, child) = root.child(None);

        guard.fire().unwrap();
        child.await;
        assert!(!root.fired());
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_cancel_a_child_on_their_own() {
        let (_root_signal, root) = signal();
        let (_guard, child) = root.child(Some(Duration::from_secs(3)));

        child.await;
        assert!(!root.fired());
    }
}
