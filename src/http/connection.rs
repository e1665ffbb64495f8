use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::http::parser::{parse_http_request, ParseError};
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::Decision;
use crate::server::AppState;

pub struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
    state: ConnectionState,
    app: Arc<AppState>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl Connection {
    pub fn new(stream: TcpStream, app: Arc<AppState>) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            app,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match &mut self.state {
                ConnectionState::Reading => {
                    match self.read_request().await {
                        Ok(Some(req)) => {
                            self.state = ConnectionState::Processing(req);
                        }
                        Ok(None) => {
                            self.state = ConnectionState::Closed;
                        }
                        Err(e) => match e.downcast_ref::<ParseError>() {
                            Some(parse_error) => {
                                tracing::warn!(error = %parse_error, "Rejecting malformed request");
                                let writer = ResponseWriter::new(&Response::bad_request());
                                self.state = ConnectionState::Writing(writer, false);
                            }
                            None => return Err(e),
                        },
                    }
                }

                ConnectionState::Processing(req) => {
                    let (response, keep_alive) = Self::handle_request(&self.app, req).await;

                    let writer = ResponseWriter::new(&response);
                    self.state = ConnectionState::Writing(writer, keep_alive);
                }

                ConnectionState::Writing(writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if *keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    } else {
                        self.state = ConnectionState::Closed;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    // Remove consumed bytes
                    self.buffer.drain(..consumed);
                    return Ok(Some(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => {
                    // Malformed request → protocol error
                    return Err(e.into());
                }
            }

            // Read more data
            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(None);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    async fn handle_request(app: &AppState, req: &Request) -> (Response, bool) {
        let mut response = match app.engine.handle(req) {
            Decision::Forward(decision) => app.proxy.forward(req, &decision).await,
            Decision::PassThrough => app.static_files.serve(req).await,
        };

        tracing::debug!(
            method = %req.method,
            path = %req.path,
            status = response.status.as_u16(),
            "Request handled"
        );

        // HEAD keeps Content-Length but never sends a body
        if req.method == Method::HEAD {
            response.body.clear();
        }

        let keep_alive = req.keep_alive(); // uses header "Connection: keep-alive"
        (response, keep_alive)
    }
}
