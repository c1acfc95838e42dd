use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::browser_protocol::animation::{
    EnableParams as AnimationEnableParams, EventAnimationStarted, ReleaseAnimationsParams,
    SeekAnimationsParams, SetPausedParams, SetPlaybackRateParams,
};
use chromiumoxide::cdp::browser_protocol::dom::{BackendNodeId, ResolveNodeParams};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
    RemoveScriptToEvaluateOnNewDocumentParams, ScriptIdentifier, Viewport as CdpClip,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    AddBindingParams, CallArgument, CallFunctionOnParams, EvaluateParams, EventBindingCalled,
    RemoteObjectId, RemoveBindingParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::browser::driver::{
    AnimationRecord, BindingCall, EVENT_CHANNEL_CAPACITY, NodeHandle, PageDriver, PageOpener,
    ScriptId,
};
use crate::foundation::config::BrowserConfig;
use crate::foundation::core::{CaptureClip, PageSource, Rect, Viewport};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::pool::resource_pool::ResourceFactory;

const CONTAINS_FN: &str = "function(node) { return this === node || this.contains(node); }";

fn cdp_err(context: &str, e: CdpError) -> CaptureError {
    let msg = format!("{context}: {e}");
    let lower = msg.to_ascii_lowercase();
    if lower.contains("closed") || lower.contains("no response") || lower.contains("channel") {
        CaptureError::page_closed(msg)
    } else {
        CaptureError::protocol(msg)
    }
}

/// Launches headless Chromium processes for the resource pool.
#[derive(Clone, Debug)]
pub struct ChromiumFactory {
    cfg: BrowserConfig,
}

impl ChromiumFactory {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self { cfg }
    }
}

/// A running browser process plus the task that drives its protocol connection.
pub struct ChromiumBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

#[async_trait]
impl ResourceFactory for ChromiumFactory {
    type Resource = ChromiumBrowser;

    #[tracing::instrument(skip(self))]
    async fn create(&self) -> CaptureResult<ChromiumBrowser> {
        let vp = self.cfg.default_viewport;
        let mut builder = CdpBrowserConfig::builder()
            .window_size(vp.width, vp.height)
            .launch_timeout(Duration::from_millis(self.cfg.launch_timeout_ms));
        if !self.cfg.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = self.cfg.executable.as_ref() {
            builder = builder.chrome_executable(exe);
        }
        let config = builder
            .build()
            .map_err(|e| CaptureError::validation(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CaptureError::protocol(format!("failed to launch browser: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser connection error");
                }
            }
        });
        tracing::info!("browser launched");
        Ok(ChromiumBrowser { browser, handler })
    }

    async fn destroy(&self, mut resource: ChromiumBrowser) {
        if let Err(e) = resource.browser.close().await {
            tracing::warn!(error = %e, "browser close failed");
        }
        if let Err(e) = resource.browser.wait().await {
            tracing::warn!(error = %e, "browser process wait failed");
        }
        resource.handler.abort();
        tracing::info!("browser destroyed");
    }
}

#[async_trait]
impl PageOpener for ChromiumBrowser {
    type Page = ChromiumPage;

    async fn open_page(&self, viewport: Viewport) -> CaptureResult<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| cdp_err("new page", e))?;
        let page = ChromiumPage {
            page,
            forwarders: Mutex::new(Vec::new()),
        };
        page.set_viewport(viewport).await?;
        Ok(page)
    }
}

/// [`PageDriver`] over one Chromium tab.
pub struct ChromiumPage {
    page: Page,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumPage {
    fn track(&self, task: JoinHandle<()>) {
        self.forwarders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }

    async fn object_for_backend_node(&self, backend_node_id: i64) -> CaptureResult<RemoteObjectId> {
        let params = ResolveNodeParams::builder()
            .backend_node_id(BackendNodeId::new(backend_node_id))
            .build();
        let resolved = self
            .page
            .execute(params)
            .await
            .map_err(|e| cdp_err("DOM.resolveNode", e))?;
        resolved
            .result
            .object
            .object_id
            .clone()
            .ok_or_else(|| CaptureError::protocol("resolved node has no remote object"))
    }
}

fn bounds_script(selector: &str) -> CaptureResult<String> {
    let sel = serde_json::to_string(selector)
        .map_err(|e| CaptureError::validation(format!("selector: {e}")))?;
    Ok(format!(
        r#"(() => {{
  const root = document.querySelector({sel});
  if (!root) return null;
  let x0 = Infinity, y0 = Infinity, x1 = -Infinity, y1 = -Infinity;
  for (const el of [root, ...root.querySelectorAll('*')]) {{
    for (const r of el.getClientRects()) {{
      if (r.width === 0 && r.height === 0) continue;
      x0 = Math.min(x0, r.left); y0 = Math.min(y0, r.top);
      x1 = Math.max(x1, r.right); y1 = Math.max(y1, r.bottom);
    }}
  }}
  if (!Number.isFinite(x0)) {{
    const r = root.getBoundingClientRect();
    x0 = r.left; y0 = r.top; x1 = r.right; y1 = r.bottom;
  }}
  return {{ x0: x0 + scrollX, y0: y0 + scrollY, x1: x1 + scrollX, y1: y1 + scrollY }};
}})()"#
    ))
}

fn rect_from_json(v: &serde_json::Value) -> Option<Rect> {
    let f = |k: &str| v.get(k).and_then(serde_json::Value::as_f64);
    Some(Rect::new(f("x0")?, f("y0")?, f("x1")?, f("y1")?))
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn set_viewport(&self, viewport: Viewport) -> CaptureResult<()> {
        let params = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            1.0,
            false,
        );
        self.page
            .execute(params)
            .await
            .map_err(|e| cdp_err("Emulation.setDeviceMetricsOverride", e))?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn load(&self, source: &PageSource) -> CaptureResult<()> {
        match source {
            PageSource::Url(url) => {
                self.page
                    .goto(url.as_str())
                    .await
                    .map_err(|e| cdp_err("navigate", e))?;
            }
            PageSource::Html(html) => {
                // A real navigation first so new-document scripts run for injected content too.
                self.page
                    .goto("about:blank")
                    .await
                    .map_err(|e| cdp_err("navigate", e))?;
                self.page
                    .set_content(html.as_str())
                    .await
                    .map_err(|e| cdp_err("set content", e))?;
            }
        }
        Ok(())
    }

    async fn animation_events(&self) -> CaptureResult<mpsc::Receiver<AnimationRecord>> {
        let mut events = self
            .page
            .event_listener::<EventAnimationStarted>()
            .await
            .map_err(|e| cdp_err("subscribe Animation.animationStarted", e))?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.track(tokio::spawn(async move {
            while let Some(ev) = events.next().await {
                let anim = &ev.animation;
                let (delay, duration, backend_node_id) = match anim.source.as_ref() {
                    Some(effect) => (
                        effect.delay,
                        effect.duration,
                        effect.backend_node_id.as_ref().map(|id| *id.inner()),
                    ),
                    None => (0.0, 0.0, None),
                };
                let record = AnimationRecord {
                    id: anim.id.clone(),
                    start_time: anim.start_time,
                    delay,
                    duration,
                    backend_node_id,
                };
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn enable_animations(&self) -> CaptureResult<()> {
        self.page
            .execute(AnimationEnableParams::default())
            .await
            .map_err(|e| cdp_err("Animation.enable", e))?;
        Ok(())
    }

    async fn set_playback_rate(&self, rate: f64) -> CaptureResult<()> {
        self.page
            .execute(SetPlaybackRateParams::new(rate))
            .await
            .map_err(|e| cdp_err("Animation.setPlaybackRate", e))?;
        Ok(())
    }

    async fn set_paused(&self, ids: &[String], paused: bool) -> CaptureResult<()> {
        self.page
            .execute(SetPausedParams::new(ids.to_vec(), paused))
            .await
            .map_err(|e| cdp_err("Animation.setPaused", e))?;
        Ok(())
    }

    async fn seek_animations(&self, ids: &[String], time_ms: f64) -> CaptureResult<()> {
        self.page
            .execute(SeekAnimationsParams::new(ids.to_vec(), time_ms))
            .await
            .map_err(|e| cdp_err("Animation.seekAnimations", e))?;
        Ok(())
    }

    async fn release_animations(&self, ids: &[String]) -> CaptureResult<()> {
        self.page
            .execute(ReleaseAnimationsParams::new(ids.to_vec()))
            .await
            .map_err(|e| cdp_err("Animation.releaseAnimations", e))?;
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> CaptureResult<Option<NodeHandle>> {
        let sel = serde_json::to_string(selector)
            .map_err(|e| CaptureError::validation(format!("selector: {e}")))?;
        let params = EvaluateParams::builder()
            .expression(format!("document.querySelector({sel})"))
            .return_by_value(false)
            .build()
            .map_err(CaptureError::protocol)?;
        let res = self
            .page
            .execute(params)
            .await
            .map_err(|e| cdp_err("Runtime.evaluate", e))?;
        if let Some(ex) = res.result.exception_details.as_ref() {
            return Err(CaptureError::validation(format!(
                "invalid selector '{selector}': {}",
                ex.text
            )));
        }
        Ok(res
            .result
            .result
            .object_id
            .as_ref()
            .map(|id| NodeHandle(id.inner().clone())))
    }

    async fn node_contains(
        &self,
        container: &NodeHandle,
        backend_node_id: i64,
    ) -> CaptureResult<bool> {
        let node = self.object_for_backend_node(backend_node_id).await?;
        let params = CallFunctionOnParams::builder()
            .function_declaration(CONTAINS_FN)
            .object_id(RemoteObjectId::new(container.0.clone()))
            .arguments(vec![CallArgument::builder().object_id(node).build()])
            .return_by_value(true)
            .build()
            .map_err(CaptureError::protocol)?;
        let res = self
            .page
            .execute(params)
            .await
            .map_err(|e| cdp_err("Runtime.callFunctionOn", e))?;
        Ok(res
            .result
            .result
            .value
            .as_ref()
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }

    async fn subtree_bounds(&self, selector: &str) -> CaptureResult<Option<Rect>> {
        let value = self.evaluate(&bounds_script(selector)?).await?;
        Ok(rect_from_json(&value))
    }

    async fn screenshot(&self, clip: CaptureClip) -> CaptureResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(CdpClip {
                x: f64::from(clip.x),
                y: f64::from(clip.y),
                width: f64::from(clip.width),
                height: f64::from(clip.height),
                scale: 1.0,
            })
            .capture_beyond_viewport(true)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| cdp_err("Page.captureScreenshot", e))
    }

    async fn evaluate(&self, expression: &str) -> CaptureResult<serde_json::Value> {
        let res = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| cdp_err("Runtime.evaluate", e))?;
        Ok(res.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn add_init_script(&self, source: &str) -> CaptureResult<ScriptId> {
        let res = self
            .page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
            .await
            .map_err(|e| cdp_err("Page.addScriptToEvaluateOnNewDocument", e))?;
        Ok(ScriptId(res.result.identifier.inner().clone()))
    }

    async fn remove_init_script(&self, id: &ScriptId) -> CaptureResult<()> {
        let params = RemoveScriptToEvaluateOnNewDocumentParams::new(ScriptIdentifier::new(
            id.0.clone(),
        ));
        self.page
            .execute(params)
            .await
            .map_err(|e| cdp_err("Page.removeScriptToEvaluateOnNewDocument", e))?;
        Ok(())
    }

    async fn add_binding(&self, name: &str) -> CaptureResult<()> {
        self.page
            .execute(AddBindingParams::new(name))
            .await
            .map_err(|e| cdp_err("Runtime.addBinding", e))?;
        Ok(())
    }

    async fn remove_binding(&self, name: &str) -> CaptureResult<()> {
        self.page
            .execute(RemoveBindingParams::new(name))
            .await
            .map_err(|e| cdp_err("Runtime.removeBinding", e))?;
        Ok(())
    }

    async fn binding_calls(&self) -> CaptureResult<mpsc::Receiver<BindingCall>> {
        let mut events = self
            .page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| cdp_err("subscribe Runtime.bindingCalled", e))?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.track(tokio::spawn(async move {
            while let Some(ev) = events.next().await {
                let call = BindingCall {
                    name: ev.name.clone(),
                    payload: ev.payload.clone(),
                };
                if tx.send(call).await.is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn close(&self) -> CaptureResult<()> {
        let forwarders: Vec<_> = self
            .forwarders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in forwarders {
            task.abort();
        }
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| cdp_err("close page", e))
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        for task in self
            .forwarders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/browser/chromium.rs"]
mod tests;
