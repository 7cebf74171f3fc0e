//! Client-side half of the Git smart-HTTP protocol: the `info/refs` negotiation and the
//! `git-upload-pack`/`git-receive-pack` POST exchanges that a fetch or push needs against a
//! remote speaking the same wire format [`super::http`] serves. Transport-only — callers decode
//! and interpret the pack bytes themselves via [`super::pack`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};
use crate::protocol::types::{COMMON_CAP_LIST, GitRef, PKT_LINE_END_MARKER, RefCommand, ServiceType};
use crate::protocol::utils::{add_pkt_line_string, read_pkt_line};

const RECEIVE_CLIENT_CAPS: &str = "report-status side-band-64k agent=wit/0.1.0";

/// Everything learned from a `GET info/refs?service=...` negotiation.
#[derive(Debug, Clone)]
pub struct RefAdvertisement {
    pub refs: Vec<GitRef>,
    pub hash_kind: HashKind,
}

/// One ref's post-push status, as reported by the remote's `report-status` capability.
pub type PushResult = (String, Result<(), String>);

/// A smart-HTTP client bound to one remote repository URL (its Git-over-HTTP root, i.e. the path
/// a server would mount `info/refs`, `git-upload-pack`, and `git-receive-pack` under).
pub struct SmartHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl SmartHttpClient {
    pub fn new(remote_url: &str) -> Self {
        SmartHttpClient {
            http: reqwest::Client::new(),
            base_url: remote_url.trim_end_matches('/').to_string(),
        }
    }

    /// `GET info/refs?service=<service>`: the first half of every fetch and push.
    pub async fn list_refs(&self, service: ServiceType) -> Result<RefAdvertisement, GitError> {
        let url = format!("{}/info/refs?service={service}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Git-Protocol", "version=0")
            .send()
            .await
            .map_err(|e| GitError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GitError::NetworkError(format!(
                "info/refs request failed with status {}",
                response.status()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| GitError::NetworkError(e.to_string()))?;
        parse_ref_advertisement(body)
    }

    /// `POST git-upload-pack`: advertise `wants`/`haves`, return the pack bytes that follow the
    /// server's ACK/NAK negotiation lines.
    pub async fn upload_pack(
        &self,
        wants: &[ObjectHash],
        haves: &[ObjectHash],
    ) -> Result<Bytes, GitError> {
        let mut body = BytesMut::new();
        for (i, want) in wants.iter().enumerate() {
            let line = if i == 0 {
                format!("want {want} {COMMON_CAP_LIST}\n")
            } else {
                format!("want {want}\n")
            };
            add_pkt_line_string(&mut body, line);
        }
        body.put(&PKT_LINE_END_MARKER[..]);
        for have in haves {
            add_pkt_line_string(&mut body, format!("have {have}\n"));
        }
        add_pkt_line_string(&mut body, "done\n".to_string());

        let url = format!("{}/git-upload-pack", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-git-upload-pack-request")
            .body(body.freeze())
            .send()
            .await
            .map_err(|e| GitError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GitError::NetworkError(format!(
                "git-upload-pack request failed with status {}",
                response.status()
            )));
        }
        let mut payload = response
            .bytes()
            .await
            .map_err(|e| GitError::NetworkError(e.to_string()))?;

        // Skip the NAK/ACK negotiation lines; what remains after the trailing flush is the pack.
        loop {
            let (consumed, line) = read_pkt_line(&mut payload);
            if consumed == 0 || line.is_empty() {
                break;
            }
        }
        Ok(payload)
    }

    /// `POST git-receive-pack`: one ref-update command per line (capabilities attached to the
    /// first), a flush, then the raw pack bytes. Returns the per-ref `ok`/`ng` report.
    pub async fn receive_pack(
        &self,
        commands: &[RefCommand],
        pack_data: &[u8],
    ) -> Result<Vec<PushResult>, GitError> {
        let mut body = BytesMut::new();
        for (i, command) in commands.iter().enumerate() {
            let line = if i == 0 {
                format!(
                    "{} {} {}\0{RECEIVE_CLIENT_CAPS}\n",
                    command.old_hash, command.new_hash, command.ref_name
                )
            } else {
                format!("{} {} {}\n", command.old_hash, command.new_hash, command.ref_name)
            };
            add_pkt_line_string(&mut body, line);
        }
        body.put(&PKT_LINE_END_MARKER[..]);
        body.put(pack_data);

        let url = format!("{}/git-receive-pack", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-git-receive-pack-request")
            .body(body.freeze())
            .send()
            .await
            .map_err(|e| GitError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GitError::NetworkError(format!(
                "git-receive-pack request failed with status {}",
                response.status()
            )));
        }
        let mut payload = response
            .bytes()
            .await
            .map_err(|e| GitError::NetworkError(e.to_string()))?;

        let mut results = Vec::new();
        loop {
            let (consumed, line) = read_pkt_line(&mut payload);
            if consumed == 0 || line.is_empty() {
                break;
            }
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if text.starts_with("unpack ") {
                if text != "unpack ok" {
                    return Err(GitError::OperationFailed(format!("remote reported {text}")));
                }
                continue;
            }
            if let Some(rest) = text.strip_prefix("ok ") {
                results.push((rest.to_string(), Ok(())));
            } else if let Some(rest) = text.strip_prefix("ng ") {
                let (name, reason) = rest.split_once(' ').unwrap_or((rest, "unknown error"));
                results.push((name.to_string(), Err(reason.to_string())));
            }
        }
        Ok(results)
    }
}

fn parse_ref_advertisement(mut body: Bytes) -> Result<RefAdvertisement, GitError> {
    let mut refs = Vec::new();
    let mut hash_kind = HashKind::Sha1;
    let mut parsed_first_ref_line = false;
    let mut seen_flush = false;

    loop {
        let (consumed, line) = read_pkt_line(&mut body);
        if consumed == 0 {
            break;
        }
        if line.is_empty() {
            // The first flush separates the `# service=` announcement from the ref list; the
            // second ends the ref list itself.
            if seen_flush {
                break;
            }
            seen_flush = true;
            continue;
        }

        let text = String::from_utf8_lossy(&line);
        if text.starts_with("# service=") {
            continue;
        }

        if !parsed_first_ref_line {
            if let Some(nul) = line.iter().position(|&b| b == 0) {
                let head = String::from_utf8_lossy(&line[..nul]).trim_end().to_string();
                let caps = String::from_utf8_lossy(&line[nul + 1..]);
                for cap in caps.split_whitespace() {
                    if let Some(fmt) = cap.strip_prefix("object-format=") {
                        hash_kind = fmt.parse().unwrap_or(HashKind::Sha1);
                    }
                }
                if let Some((hash, name)) = head.split_once(' ') {
                    if name != "capabilities^{}" {
                        refs.push(GitRef { name: name.to_string(), hash: hash.to_string() });
                    }
                }
            }
            parsed_first_ref_line = true;
            continue;
        }

        let text = text.trim_end();
        if let Some((hash, name)) = text.split_once(' ') {
            refs.push(GitRef { name: name.to_string(), hash: hash.to_string() });
        }
    }

    Ok(RefAdvertisement { refs, hash_kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn pkt(buf: &mut BytesMut, s: &str) {
        add_pkt_line_string(buf, s.to_string());
    }

    #[test]
    fn parses_a_typical_ref_advertisement() {
        let mut raw = BytesMut::new();
        pkt(&mut raw, "# service=git-upload-pack\n");
        raw.put(&PKT_LINE_END_MARKER[..]);
        pkt(
            &mut raw,
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa HEAD\0side-band-64k object-format=sha1\n",
        );
        pkt(&mut raw, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa refs/heads/main\n");
        pkt(&mut raw, "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb refs/heads/dev\n");
        raw.put(&PKT_LINE_END_MARKER[..]);

        let advertisement = parse_ref_advertisement(raw.freeze()).unwrap();
        assert_eq!(advertisement.hash_kind, HashKind::Sha1);
        assert_eq!(advertisement.refs.len(), 3);
        assert_eq!(advertisement.refs[0].name, "HEAD");
        assert_eq!(advertisement.refs[2].name, "refs/heads/dev");
    }

    #[test]
    fn empty_repository_advertises_no_refs() {
        let mut raw = BytesMut::new();
        pkt(&mut raw, "# service=git-upload-pack\n");
        raw.put(&PKT_LINE_END_MARKER[..]);
        pkt(
            &mut raw,
            "0000000000000000000000000000000000000000 capabilities^{}\0side-band-64k\n",
        );
        raw.put(&PKT_LINE_END_MARKER[..]);

        let advertisement = parse_ref_advertisement(raw.freeze()).unwrap();
        assert!(advertisement.refs.is_empty());
    }
}
