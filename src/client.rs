use crate::{error::Error, pose::PoseResponse};
use std::{fs, path::Path, time::Duration};
use tracing::debug;
use ureq::unversioned::multipart::{Form, Part};

pub(crate) trait PoseEstimator {
    /// Estimate the poses in one encoded image.
    fn estimate(&self, image: &[u8], file_name: &str) -> Result<PoseResponse, Error>;

    /// Estimate the poses in an image file.
    fn estimate_file(&self, path: &Path) -> Result<PoseResponse, Error> {
        let image = fs::read(path).map_err(|e| Error::ReadFile(e, path.to_path_buf()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_owned());
        self.estimate(&image, &file_name)
    }
}

/// Blocking client for a pose-estimation REST service.
pub(crate) struct PoseClient {
    agent: ureq::Agent,
    url: String,
}

impl PoseClient {
    pub(crate) fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            url: url.into(),
        }
    }
}

impl PoseEstimator for PoseClient {
    fn estimate(&self, image: &[u8], file_name: &str) -> Result<PoseResponse, Error> {
        debug!(
            message = "submitting image to pose service",
            url = %self.url,
            file_name,
            bytes = image.len()
        );
        let form = Form::new().part("file", Part::bytes(image).file_name(file_name));
        let response = self
            .agent
            .post(self.url.as_str())
            .send(form)
            .map_err(|e| Error::PoseRequest(e, self.url.clone()))?;
        response
            .into_body()
            .read_json::<PoseResponse>()
            .map_err(Error::DecodePoseResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::{PoseClient, PoseEstimator};
    use crate::{dataset::tests::response_json, error::Error};
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
        time::Duration,
    };

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }

    /// Answer one request with `body` and hand back the raw request.
    fn serve_once(body: String) -> (String, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/model/predict", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .unwrap();
            request
        });
        (url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let header_end = match find(request, b"\r\n\r\n") {
            Some(end) => end + 4,
            None => return false,
        };
        let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
        let content_length = headers.lines().find_map(|line| {
            line.strip_prefix("content-length:")
                .and_then(|value| value.trim().parse::<usize>().ok())
        });
        match content_length {
            Some(length) => request.len() - header_end >= length,
            None => request.ends_with(b"0\r\n\r\n"),
        }
    }

    #[test]
    fn posts_image_as_file_field() {
        let (url, server) = serve_once(response_json(&[(1.0, 2.0), (3.0, 4.0)]));
        let client = PoseClient::new(url, Duration::from_secs(5));

        let response = client.estimate(b"\xff\xd8jpeg", "warrior.jpg").unwrap();
        assert_eq!(response.predictions.len(), 1);
        assert_eq!(response.predictions[0].body_parts.len(), 2);

        let request = server.join().unwrap();
        let text = String::from_utf8_lossy(&request);
        assert!(text.starts_with("POST /model/predict "));
        assert!(text
            .to_lowercase()
            .contains("content-type: multipart/form-data; boundary="));
        assert!(text.contains("name=\"file\"; filename=\"warrior.jpg\""));
        assert!(find(&request, b"\xff\xd8jpeg").is_some());
    }

    #[test]
    fn unreachable_service_is_a_recoverable_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/model/predict", listener.local_addr().unwrap());
        drop(listener);

        let client = PoseClient::new(url.as_str(), Duration::from_secs(5));
        let result = client.estimate(b"jpeg", "tree.jpg");
        assert!(matches!(&result, Err(Error::PoseRequest(_, u)) if *u == url));
        assert!(result.unwrap_err().is_recoverable());
    }
}
