//! MJPEG camera preview (`multipart/x-mixed-replace`).

use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use futures::stream;
use std::convert::Infallible;
use tokio::sync::mpsc;

use crate::live::CaptureEvent;

pub const BOUNDARY: &str = "frame";

fn jpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

fn text_part(text: &str) -> Vec<u8> {
    format!("--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\n{text}\r\n").into_bytes()
}

/// Turn captured frames into multipart chunks.
///
/// An unopenable camera yields one text part; a read failure ends the stream.
pub fn mjpeg_response(frames: mpsc::Receiver<CaptureEvent>) -> Response {
    let parts = stream::unfold(frames, |mut frames| async move {
        loop {
            match frames.recv().await? {
                CaptureEvent::Frame(frame) => match frame.to_jpeg() {
                    Ok(jpeg) => return Some((Ok::<_, Infallible>(jpeg_part(&jpeg)), frames)),
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot encode frame; skipping");
                        continue;
                    }
                },
                CaptureEvent::OpenFailed(_) => {
                    return Some((Ok(text_part("Camera not accessible")), frames));
                }
                CaptureEvent::ReadFailed(_) => return None,
            }
        }
    });

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )],
        Body::from_stream(parts),
    )
        .into_response()
}
