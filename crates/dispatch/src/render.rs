// SPDX-License-Identifier: BUSL-1.1

//! Render Broker (§4.E) — bounded-concurrency producer of raster bytes.
//!
//! The real receipt HTML templating and headless-browser rasterization are
//! external collaborators out of scope for this core (§1). What lives here
//! is the scheduling contract the dispatcher depends on — a semaphore-bounded
//! worker pool, async completion, shared buffers for multi-tenant fan-out —
//! wired to a placeholder renderer that produces a structurally faithful
//! (but not pixel-faithful) receipt image: a thresholded 2-colour PNG at the
//! fixed 565px width, encoding the order metadata as bars rather than text,
//! with the printer cut-command bytes appended (§6).

use std::sync::Arc;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tokio::sync::Semaphore;

use crate::model::OrderMetadata;
use crate::state::AppState;

/// Receipt raster width, fixed by the printer firmware (§6).
const RECEIPT_WIDTH: u32 = 565;
/// Monochrome threshold (§6): pixel values >= this map to white, else black.
const THRESHOLD: u8 = 160;
/// Printer command appended after the PNG `IEND` chunk: feed and cut (§6).
const CUT_COMMAND: [u8; 3] = [0x1B, 0x64, 0x02];

/// What to render for one intake request. `job_ids` may name more than one
/// job when a single order fans out to several tenants sharing one render.
pub struct RenderRequest {
    pub job_ids: Vec<String>,
    pub metadata: OrderMetadata,
    pub order: serde_json::Value,
}

/// Bounded-concurrency async producer of raster bytes (§4.E).
pub struct RenderBroker {
    permits: Arc<Semaphore>,
}

impl RenderBroker {
    pub fn new(concurrency: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// Queue a render behind the concurrency limit and return immediately.
    /// Completion re-enters the job store only through `attach_content` /
    /// `mark_render_failed`, and never while holding the job-store lock.
    pub fn submit(&self, state: Arc<AppState>, request: RenderRequest) {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed during shutdown
            };

            match render_placeholder(&request.metadata, &request.order) {
                Ok(bytes) => {
                    let bytes: Arc<[u8]> = Arc::from(bytes);
                    for token in &request.job_ids {
                        state.jobs.attach_content(token, Arc::clone(&bytes)).await;
                    }
                    tracing::debug!(tokens = ?request.job_ids, bytes = bytes.len(), "render attached");
                }
                Err(err) => {
                    tracing::warn!(tokens = ?request.job_ids, %err, "render failed");
                    for token in &request.job_ids {
                        state.jobs.mark_render_failed(token).await;
                    }
                }
            }
        });
    }
}

/// Render a structurally faithful placeholder receipt: a thresholded,
/// two-colour raster whose height and horizontal bars vary with the order
/// metadata, so distinct orders produce distinguishable (if not legible)
/// output — useful for tests asserting that distinct orders don't collide.
fn render_placeholder(
    metadata: &OrderMetadata,
    order: &serde_json::Value,
) -> Result<Vec<u8>, image::ImageError> {
    let seed = receipt_seed(metadata, order);
    let height = 200 + (seed % 400) as u32;

    let mut image = image::GrayImage::new(RECEIPT_WIDTH, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let band = ((y + seed) / 24) % 2 == 0;
        let margin = x < 20 || x >= RECEIPT_WIDTH - 20;
        let value = if margin || !band { 255u8 } else { 0u8 };
        *pixel = image::Luma([threshold(value)]);
    }

    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        RECEIPT_WIDTH,
        height,
        ExtendedColorType::L8,
    )?;
    bytes.extend_from_slice(&CUT_COMMAND);
    Ok(bytes)
}

fn threshold(value: u8) -> u8 {
    if value >= THRESHOLD {
        255
    } else {
        0
    }
}

/// Deterministic seed derived from order metadata, used only to vary the
/// placeholder's geometry — not a hash with any security property.
fn receipt_seed(metadata: &OrderMetadata, order: &serde_json::Value) -> u32 {
    let mut acc: u32 = 2166136261;
    let mut feed = |s: &str| {
        for b in s.bytes() {
            acc ^= b as u32;
            acc = acc.wrapping_mul(16777619);
        }
    };
    feed(metadata.order_id.as_deref().unwrap_or(""));
    feed(metadata.order_number.as_deref().unwrap_or(""));
    feed(metadata.customer_name.as_deref().unwrap_or(""));
    feed(&order.to_string());
    acc
}
