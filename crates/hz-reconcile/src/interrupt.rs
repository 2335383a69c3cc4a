use tokio::sync::watch;

/// Raises the interrupt seen by every clone of the paired [`Interrupt`].
#[derive(Debug)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

impl InterruptHandle {
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }
}

/// Interrupt token passed into the engine entry points.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: Option<watch::Receiver<bool>>,
}

pub fn interrupt_channel() -> (InterruptHandle, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle { tx }, Interrupt { rx: Some(rx) })
}

impl Interrupt {
    /// A token that is never raised.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_raised(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the interrupt is raised. Pending forever when the handle
    /// was dropped without raising.
    pub async fn raised(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            if rx.wait_for(|raised| *raised).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn raise_wakes_all_clones() {
        let (handle, interrupt) = interrupt_channel();
        let other = interrupt.clone();
        assert!(!interrupt.is_raised());

        handle.raise();
        assert!(interrupt.is_raised());
        tokio::time::timeout(Duration::from_secs(1), other.raised())
            .await
            .expect("clone must observe the interrupt");
    }

    #[tokio::test]
    async fn never_stays_pending() {
        let never = Interrupt::never();
        assert!(!never.is_raised());
        assert!(
            tokio::time::timeout(Duration::from_millis(20), never.raised())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn dropped_handle_is_not_an_interrupt() {
        let (handle, interrupt) = interrupt_channel();
        drop(handle);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), interrupt.raised())
                .await
                .is_err()
        );
    }
}
