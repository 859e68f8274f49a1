use std::sync::Arc;

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws::{self, CloseCode, CloseReason};
use tokio::sync::mpsc;

use pixel_system::{ClientRequest, DecodeError, ServerEvent, SessionId};

use crate::hub::HubHandle;
use crate::pipeline::{Pipeline, Requester};
use crate::AppState;

#[derive(Message)]
#[rtype(result = "()")]
enum Outbound {
    Frame(String),
    /// The hub dropped this session's queue.
    Closed,
}

struct ConnectionActor {
    session_id: SessionId,
    hub: HubHandle,
    pipeline: Arc<Pipeline>,
    queue_capacity: usize,
    requester: Option<Requester>,
    registered: bool,
}

impl ConnectionActor {
    fn new(state: &AppState) -> Self {
        Self {
            session_id: state.hub.next_session_id(),
            hub: state.hub.clone(),
            pipeline: state.pipeline.clone(),
            queue_capacity: state.session_queue_capacity,
            requester: None,
            registered: false,
        }
    }

    fn handle_frame(&self, frame: &str) {
        let requester = match &self.requester {
            Some(requester) => requester,
            None => return,
        };

        match ClientRequest::decode(frame) {
            Ok(Some(request)) => {
                log::debug!("Ingress {} from session {}", request.kind(), self.session_id);
                self.pipeline.dispatch(request, requester);
            }
            Ok(None) => log::debug!(
                "Ignoring unknown request type from session {}",
                self.session_id
            ),
            Err(DecodeError::Malformed(err)) => {
                log::warn!("Malformed frame from session {}: {}", self.session_id, err)
            }
            Err(DecodeError::InvalidPayload { kind, source }) => {
                log::warn!(
                    "Invalid {} payload from session {}: {}",
                    kind,
                    self.session_id,
                    source
                );
                requester.send(&ServerEvent::error(kind.invalid_request_message()));
            }
        }
    }
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) = mpsc::channel::<String>(self.queue_capacity);
        self.requester = Some(Requester::new(self.session_id, &tx));

        if let Err(err) = self.hub.register(self.session_id, tx) {
            log::error!("Could not register session {}: {}", self.session_id, err);
            ctx.stop();
            return;
        }
        self.registered = true;

        let addr = ctx.address();
        let session_id = self.session_id;
        actix::spawn(async move {
            log::debug!("session {} writer - started", session_id);
            while let Some(frame) = rx.recv().await {
                if addr.send(Outbound::Frame(frame)).await.is_err() {
                    break;
                }
            }
            addr.do_send(Outbound::Closed);
            log::debug!("session {} writer - terminated", session_id);
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if std::mem::take(&mut self.registered) {
            if let Err(err) = self.hub.unregister(self.session_id) {
                log::error!("Could not unregister session {}: {}", self.session_id, err);
            }
        }

        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => (),
            Ok(ws::Message::Text(text)) => self.handle_frame(&text),
            Ok(ws::Message::Binary(bin)) => match std::str::from_utf8(&bin) {
                Ok(text) => self.handle_frame(text),
                Err(err) => log::warn!(
                    "Dropping non UTF-8 binary frame from session {}: {}",
                    self.session_id,
                    err
                ),
            },
            Ok(ws::Message::Continuation(_)) => {
                log::warn!(
                    "Dropping fragmented frame from session {}",
                    self.session_id
                );
            }
            Ok(ws::Message::Close(reason)) => {
                log::debug!("Session {} closed: {:?}", self.session_id, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                log::warn!("Protocol error on session {}: {}", self.session_id, err);
                ctx.stop();
            }
        }
    }
}

/// Egress
impl Handler<Outbound> for ConnectionActor {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) -> Self::Result {
        match msg {
            Outbound::Frame(frame) => ctx.text(frame),
            Outbound::Closed => {
                // the hub has already forgotten this session
                self.registered = false;
                ctx.close(Some(CloseReason {
                    code: CloseCode::Normal,
                    description: None,
                }));
                ctx.stop();
            }
        }
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws::WsResponseBuilder::new(ConnectionActor::new(&state), &req, stream)
        .frame_size(state.max_frame_size)
        .start()
}
