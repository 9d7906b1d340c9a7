use crate::{
    classifier::{ClassifierError, EmotionClassifier},
    frame::{decode_frame, ErrorMessage, FrameError, PredictionMessage},
    server::SharedState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip(ws, state))]
pub async fn emotion_socket(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Per-connection loop. Frames are processed strictly one at a time; the
/// reply for a frame is sent before the next frame is read. The socket is
/// dropped (and the connection released) on every exit path.
async fn handle_session(mut socket: WebSocket, state: SharedState) {
    tracing::info!("Session opened");

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                // Transport failure: there is no channel left to report on.
                tracing::warn!("Transport error, closing session: {}", e);
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Ping/Pong are answered at the protocol level; binary frames
            // are not part of the contract.
            _ => continue,
        };

        let (reply, control) = handle_frame(text.as_str(), &state).await;

        let send_result = match &reply {
            FrameReply::Prediction(message) => send_json(&mut socket, message).await,
            FrameReply::Error(message) => send_json(&mut socket, message).await,
        };

        if send_result.is_err() || control == SessionControl::Close {
            break;
        }
    }

    tracing::info!("Session closed");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionControl {
    Continue,
    Close,
}

enum FrameReply {
    Prediction(PredictionMessage),
    Error(ErrorMessage),
}

/// Outcome of one inbound text frame: the reply to send and whether the
/// session survives it. A failing frame closes the session unless
/// `session.close_on_error` is flipped off, in which case the bad frame is
/// skipped and the loop keeps receiving.
async fn handle_frame(text: &str, state: &SharedState) -> (FrameReply, SessionControl) {
    match process_frame(text, state.classifier.clone()).await {
        Ok(reply) => {
            tracing::info!("Prediction sent: {}", reply.emotion);
            (FrameReply::Prediction(reply), SessionControl::Continue)
        }
        Err(err) => {
            tracing::error!("Error processing frame: {}", err);
            let control = if state.session.close_on_error {
                SessionControl::Close
            } else {
                SessionControl::Continue
            };
            (FrameReply::Error(ErrorMessage::new(&err)), control)
        }
    }
}

/// Steps 1-10 of the per-frame pipeline: decode the frame, run the shared
/// classifier on a blocking worker, keep the first detected face and derive
/// percentages and the dominant label from its score map.
async fn process_frame(
    text: &str,
    classifier: Arc<dyn EmotionClassifier>,
) -> Result<PredictionMessage, FrameError> {
    let image = decode_frame(text)?;
    tracing::info!("Frame received");

    let faces = tokio::task::spawn_blocking(move || classifier.detect_emotions(&image))
        .await
        .map_err(|e| ClassifierError::Inference(format!("classifier task failed: {}", e)))??;

    let face = faces.into_iter().next().ok_or(FrameError::NoFaceDetected)?;

    let predictions = face.emotions;
    let percentages = predictions
        .percentages()
        .ok_or(FrameError::DegenerateScores)?;
    let emotion = predictions.dominant();

    tracing::info!("Computed percentages: {:?}", percentages);

    Ok(PredictionMessage {
        predictions,
        emotion: emotion.as_str(),
        percentages,
    })
}

async fn send_json(socket: &mut WebSocket, value: &impl Serialize) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).map_err(axum::Error::new)?;
    socket.send(Message::Text(text.into())).await
}
