use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::AdError;
use crate::model::{AdEvent, AdUnit, HostContext, ShowRect};
use crate::router::CallbackRouter;

/// The view that paints a unit on screen. Only ever called from the render
/// task, so implementations need no internal locking.
pub trait PresentationGateway: Send + 'static {
    /// Prepare the surface ahead of the first show.
    fn init_surface(&mut self);

    /// Display `unit`. Must settle `callback` exactly once, now or later.
    fn show(
        &mut self,
        ctx: &HostContext,
        rect: ShowRect,
        placement_id: &str,
        unit: AdUnit,
        callback: RenderCallback,
    );

    fn hide(&mut self);

    fn is_showing(&self) -> bool;
}

// ── Render command channel ───────────────────────────────

enum RenderCommand {
    InitSurface,
    Show {
        ctx: HostContext,
        rect: ShowRect,
        unit: AdUnit,
        callback: RenderCallback,
    },
    Hide {
        placement_id: String,
    },
    RenderFailed {
        placement_id: String,
        message: String,
    },
    IsShowing {
        response: oneshot::Sender<bool>,
    },
}

/// Background task that owns the gateway. Commands run strictly in the order
/// they were sent, which makes this the single serialized render context.
async fn render_loop<G: PresentationGateway>(
    mut gateway: G,
    mut rx: mpsc::UnboundedReceiver<RenderCommand>,
    router: Arc<CallbackRouter>,
) {
    // Placement whose unit was last handed to the gateway
    let mut on_screen: Option<String> = None;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RenderCommand::InitSurface => gateway.init_surface(),
            RenderCommand::Show {
                ctx,
                rect,
                unit,
                callback,
            } => {
                let placement_id = unit.placement_id.clone();
                if let Some(previous) = on_screen.take()
                    && gateway.is_showing()
                {
                    gateway.hide();
                    debug!("{previous} replaced by {placement_id}");
                    router.send(&previous, AdEvent::Closed);
                }
                debug!("showing unit {} on {placement_id}", unit.id);
                on_screen = Some(placement_id.clone());
                gateway.show(&ctx, rect, &placement_id, unit, callback);
            }
            RenderCommand::Hide { placement_id } => {
                if on_screen.as_deref() != Some(placement_id.as_str()) {
                    debug!("hide on {placement_id}: not on screen");
                    continue;
                }
                on_screen = None;
                if !gateway.is_showing() {
                    debug!("hide on {placement_id}: nothing showing");
                    continue;
                }
                gateway.hide();
                debug!("hid surface for {placement_id}");
                router.send(&placement_id, AdEvent::Closed);
            }
            RenderCommand::RenderFailed {
                placement_id,
                message,
            } => {
                // A failed render may leave a half-built surface behind, but
                // only tear it down if it is still this placement's
                if on_screen.as_deref() == Some(placement_id.as_str()) {
                    on_screen = None;
                    gateway.hide();
                }
                router.send(
                    &placement_id,
                    AdEvent::ShowFailed(AdError::ShowUnknownException(message)),
                );
                router.send(&placement_id, AdEvent::Closed);
            }
            RenderCommand::IsShowing { response } => {
                let _ = response.send(gateway.is_showing());
            }
        }
    }
    debug!("render loop stopped");
}

/// Cloneable handle to the render task.
#[derive(Clone)]
pub struct Presenter {
    tx: mpsc::UnboundedSender<RenderCommand>,
    router: Arc<CallbackRouter>,
}

impl Presenter {
    /// Spawn the render task on the current Tokio runtime.
    pub fn spawn<G: PresentationGateway>(gateway: G, router: Arc<CallbackRouter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(render_loop(gateway, rx, router.clone()));
        Self { tx, router }
    }

    /// True once the render task has stopped taking commands.
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn init_surface(&self) {
        if self.tx.send(RenderCommand::InitSurface).is_err() {
            warn!("render task stopped, surface not initialised");
        }
    }

    /// Queue `unit` for display. Fails only when the render task is gone.
    pub(crate) fn show(&self, ctx: HostContext, rect: ShowRect, unit: AdUnit) -> Result<(), AdError> {
        let callback = RenderCallback {
            placement_id: unit.placement_id.clone(),
            settled: Arc::new(AtomicBool::new(false)),
            tx: self.tx.clone(),
            router: self.router.clone(),
        };
        self.tx
            .send(RenderCommand::Show {
                ctx,
                rect,
                unit,
                callback,
            })
            .map_err(|_| AdError::ShowUnknownException("render task stopped".into()))
    }

    /// Hide whatever is on screen and publish `Closed` for `placement_id`.
    /// No-op when nothing is showing.
    pub fn hide(&self, placement_id: &str) {
        let cmd = RenderCommand::Hide {
            placement_id: placement_id.to_string(),
        };
        if self.tx.send(cmd).is_err() {
            warn!("render task stopped, hide for {placement_id} dropped");
        }
    }

    /// Ask the render task whether a unit is on screen. Resolves after every
    /// previously queued command has run.
    pub async fn is_showing(&self) -> bool {
        let (response, rx) = oneshot::channel();
        if self.tx.send(RenderCommand::IsShowing { response }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// Handed to the gateway with each show. `rendered` and `failed` settle it;
/// whichever comes first wins and later calls are ignored.
#[derive(Clone)]
pub struct RenderCallback {
    placement_id: String,
    settled: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<RenderCommand>,
    router: Arc<CallbackRouter>,
}

impl RenderCallback {
    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }

    pub fn rendered(&self) {
        if !self.settle() {
            return;
        }
        metrics::counter!(crate::observability::SHOWS_TOTAL, "status" => "rendered").increment(1);
        self.router.send(&self.placement_id, AdEvent::Shown);
    }

    pub fn failed(&self, message: impl Into<String>) {
        if !self.settle() {
            return;
        }
        let message = message.into();
        warn!("render failed on {}: {message}", self.placement_id);
        metrics::counter!(crate::observability::SHOWS_TOTAL, "status" => "render_failed").increment(1);
        let cmd = RenderCommand::RenderFailed {
            placement_id: self.placement_id.clone(),
            message: message.clone(),
        };
        if self.tx.send(cmd).is_err() {
            self.router.send(
                &self.placement_id,
                AdEvent::ShowFailed(AdError::ShowUnknownException(message)),
            );
            self.router.send(&self.placement_id, AdEvent::Closed);
        }
    }

    pub fn clicked(&self) {
        self.router.send(&self.placement_id, AdEvent::Clicked);
    }

    pub fn placement_id(&self) -> &str {
        &self.placement_id
    }
}

#[cfg(test)]
impl Presenter {
    /// A presenter whose render task is already gone.
    pub(crate) fn stopped(router: Arc<CallbackRouter>) -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx, router }
    }
}
