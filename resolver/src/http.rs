use std::{
    io,
    sync::{Arc, OnceLock},
    time::Duration,
};

use futures::StreamExt;
use reqwest::StatusCode;
use url::Url;
use vitrine_descriptor::{Fqn, WidgetType};

use super::{Backend, Error};

/// Fetches `GET {base}/api/widgetType/{fqn}` from the platform backend.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    base: Url,
    client: Arc<OnceLock<reqwest::Client>>,
    options: HttpBackendOptions,
}

impl HttpBackend {
    pub fn new(base: Url) -> Result<Self, Error> {
        Self::with_options(base, HttpBackendOptions::default())
    }

    pub fn with_options(base: Url, options: HttpBackendOptions) -> Result<Self, Error> {
        match base.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(Error::UnsupportedScheme {
                    scheme: scheme.to_string(),
                });
            }
        }
        if base.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl { url: base });
        }
        Ok(Self {
            base,
            client: Arc::new(OnceLock::new()),
            options,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn client(&self) -> Result<&reqwest::Client, Error> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(self.options.connect_timeout)
            .timeout(self.options.request_timeout)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    pub fn widget_type_url(&self, fqn: &Fqn) -> Result<Url, Error> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl {
                url: self.base.clone(),
            })?
            .pop_if_empty()
            .extend(["api", "widgetType", fqn.as_str()]);
        Ok(url)
    }

    async fn fetch_widget_type(&self, fqn: &Fqn) -> Result<WidgetType, Error> {
        let url = self.widget_type_url(fqn)?;
        let res = self.client()?.get(url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound { fqn: fqn.clone() });
        }
        let res = res.error_for_status()?;
        let resolved_url = res.url().clone();

        let max_body_bytes = self.options.max_body_bytes;
        if let Some(content_length) = res.content_length()
            && content_length > max_body_bytes as u64
        {
            return Err(Error::ResponseTooLarge {
                url: resolved_url,
                size: content_length,
                max_bytes: max_body_bytes,
            });
        }

        let mut body = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > max_body_bytes {
                return Err(Error::ResponseTooLarge {
                    url: resolved_url,
                    size: (body.len() + chunk.len()) as u64,
                    max_bytes: max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let body = std::str::from_utf8(&body)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let widget_type = WidgetType::parse(body)?;
        if widget_type.fqn != *fqn {
            return Err(Error::FqnMismatch {
                requested: fqn.clone(),
                found: widget_type.fqn,
            });
        }
        Ok(widget_type)
    }
}

impl Backend for HttpBackend {
    fn fetch<'a>(
        &'a self,
        fqn: &'a Fqn,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<WidgetType, Error>> + Send + 'a>> {
        Box::pin(self.fetch_widget_type(fqn))
    }
}

#[derive(Clone, Debug)]
pub struct HttpBackendOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for HttpBackendOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read as _, Write as _},
        net::{Shutdown, TcpListener},
        sync::Arc,
        time::{Duration, Instant},
    };

    use url::Url;
    use vitrine_descriptor::Fqn;

    use super::HttpBackend;
    use crate::DescriptorResolver;

    fn accept_with_deadline(listener: &TcpListener, deadline: Instant) -> std::net::TcpStream {
        loop {
            match listener.accept() {
                Ok((stream, _)) => return stream,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        panic!("timed out waiting for client connection");
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(err) => panic!("accept failed: {err}"),
            }
        }
    }

    fn read_request_path(stream: &mut std::net::TcpStream) -> String {
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let read = stream.read(&mut chunk).unwrap();
            if read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..read]);
        }

        let text = std::str::from_utf8(&buf).unwrap();
        let first_line = text.lines().next().unwrap();
        let mut parts = first_line.split_whitespace();
        let _method = parts.next().unwrap();
        parts.next().unwrap().to_string()
    }

    /// Serves one request with `status` and `body`, returning the requested path.
    fn spawn_single_response_server(
        status: &'static str,
        body: String,
    ) -> (Url, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let base = Url::parse(&format!("http://{addr}/tb")).unwrap();

        let handle = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut stream = accept_with_deadline(&listener, deadline);
            let path = read_request_path(&mut stream);
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nConnection: \
                 close\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.shutdown(Shutdown::Both).unwrap();
            path
        });

        (base, handle)
    }

    #[tokio::test]
    async fn fetches_widget_type_by_fqn() {
        let body = r#"{ "fqn": "cards.value", "name": "Value", "descriptor": { "sizeX": 3 } }"#;
        let (base, server) = spawn_single_response_server("200 OK", body.to_string());

        let resolver = DescriptorResolver::new(Arc::new(HttpBackend::new(base).unwrap()));
        let wt = resolver
            .resolve(&Fqn::new("cards.value").unwrap())
            .await
            .unwrap();

        assert_eq!(wt.descriptor.size_x, 3);
        assert_eq!(server.join().unwrap(), "/tb/api/widgetType/cards.value");
    }

    #[tokio::test]
    async fn not_found_status_maps_to_not_found() {
        let (base, server) = spawn_single_response_server("404 Not Found", String::new());

        let backend = HttpBackend::new(base).unwrap();
        let resolver = DescriptorResolver::new(Arc::new(backend));
        let err = resolver
            .resolve(&Fqn::new("cards.missing").unwrap())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        server.join().unwrap();
    }

    #[test]
    fn rejects_non_http_base() {
        let err = HttpBackend::new(Url::parse("ftp://example.com").unwrap()).unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedScheme { .. }));
    }
}
