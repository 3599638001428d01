//! JSON representation of flows sent to observers

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::{epoch_secs, CertificateInfo, Connection, Flow, FlowData, Headers, MessagesMeta};

fn opt_ts(ts: &Option<chrono::DateTime<chrono::Utc>>) -> Value {
    ts.as_ref().map(|t| json!(epoch_secs(t))).unwrap_or(Value::Null)
}

fn content_fields(content: Option<&[u8]>) -> (Value, Value) {
    match content {
        Some(bytes) => (
            json!(bytes.len()),
            json!(hex::encode(Sha256::digest(bytes))),
        ),
        None => (Value::Null, Value::Null),
    }
}

fn cert_to_json(cert: &CertificateInfo) -> Value {
    json!({
        "keyinfo": [cert.keyinfo.0, cert.keyinfo.1],
        "sha256": cert.sha256,
        "notbefore": cert.notbefore.timestamp(),
        "notafter": cert.notafter.timestamp(),
        "serial": cert.serial,
        "subject": cert.subject,
        "issuer": cert.issuer,
        "altnames": cert.altnames,
    })
}

fn conn_to_json(conn: &Connection, server: bool) -> Value {
    let mut obj = json!({
        "id": conn.id,
        "peername": conn.peername,
        "sockname": conn.sockname,
        "tls_established": conn.tls_established,
        "cert": conn.certificate_list.first().map(cert_to_json),
        "sni": conn.sni,
        "cipher": conn.cipher,
        "alpn": conn.alpn,
        "tls_version": conn.tls_version,
        "timestamp_start": opt_ts(&conn.timestamp_start),
        "timestamp_tls_setup": opt_ts(&conn.timestamp_tls_setup),
        "timestamp_end": opt_ts(&conn.timestamp_end),
    });
    if server {
        obj["address"] = json!(conn.peername);
    }
    obj
}

fn headers_json(headers: &Headers) -> Value {
    json!(headers
        .iter()
        .map(|(k, v)| [k, v])
        .collect::<Vec<_>>())
}

/// Serialize a flow into the shape observers consume
pub fn flow_to_json(flow: &Flow) -> Value {
    let mut f = Map::new();
    f.insert("id".into(), json!(flow.id));
    f.insert("intercepted".into(), json!(flow.intercepted));
    f.insert("is_replay".into(), json!(flow.is_replay));
    f.insert("type".into(), json!(flow.kind()));
    f.insert("modified".into(), json!(flow.modified()));
    f.insert("marked".into(), json!(flow.marked));
    f.insert("comment".into(), json!(flow.comment));
    f.insert("timestamp_created".into(), json!(epoch_secs(&flow.timestamp_created)));
    f.insert("client_conn".into(), conn_to_json(&flow.client_conn, false));
    f.insert("server_conn".into(), conn_to_json(&flow.server_conn, true));

    if let Some(err) = &flow.error {
        f.insert(
            "error".into(),
            json!({"msg": err.msg, "timestamp": epoch_secs(&err.timestamp)}),
        );
    }

    match &flow.data {
        FlowData::Http {
            request,
            response,
            websocket,
        } => {
            let (len, hash) = content_fields(request.content.as_deref());
            let mut req = json!({
                "method": request.method,
                "scheme": request.scheme,
                "host": request.host,
                "port": request.port,
                "path": request.path,
                "http_version": request.http_version,
                "headers": headers_json(&request.headers),
                "contentLength": len,
                "contentHash": hash,
                "timestamp_start": epoch_secs(&request.timestamp_start),
                "timestamp_end": opt_ts(&request.timestamp_end),
                "pretty_host": request.pretty_host(),
            });
            if let Some(trailers) = &request.trailers {
                req["trailers"] = headers_json(trailers);
            }
            f.insert("request".into(), req);

            if let Some(response) = response {
                let (len, hash) = content_fields(response.content.as_deref());
                let mut resp = json!({
                    "http_version": response.http_version,
                    "status_code": response.status_code,
                    "reason": response.reason,
                    "headers": headers_json(&response.headers),
                    "contentLength": len,
                    "contentHash": hash,
                    "timestamp_start": epoch_secs(&response.timestamp_start),
                    "timestamp_end": opt_ts(&response.timestamp_end),
                });
                if let Some(trailers) = &response.trailers {
                    resp["trailers"] = headers_json(trailers);
                }
                f.insert("response".into(), resp);
            }

            if let Some(ws) = websocket {
                let meta = MessagesMeta::from_parts(
                    ws.messages.iter().map(|m| (m.content.as_slice(), m.timestamp)),
                );
                f.insert(
                    "websocket".into(),
                    json!({
                        "messages_meta": meta,
                        "closed_by_client": ws.closed_by_client,
                        "close_code": ws.close_code,
                        "close_reason": ws.close_reason,
                        "timestamp_end": opt_ts(&ws.timestamp_end),
                    }),
                );
            }
        }
        FlowData::Tcp { messages } => {
            let meta = MessagesMeta::from_parts(
                messages.iter().map(|m| (m.content.as_slice(), m.timestamp)),
            );
            f.insert("messages_meta".into(), json!(meta));
        }
        FlowData::Dns { request, response } => {
            f.insert("request".into(), json!(request));
            if let Some(response) = response {
                f.insert("response".into(), json!(response));
            }
        }
    }

    Value::Object(f)
}
