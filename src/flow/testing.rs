//! Flow fixtures for tests

use chrono::{TimeZone, Utc};

use super::*;

pub fn tclient_conn() -> Connection {
    let mut conn = Connection::new(Some(("127.0.0.1".to_string(), 22)));
    conn.sockname = Some(("127.0.0.1".to_string(), 8080));
    conn
}

pub fn tserver_conn() -> Connection {
    let mut conn = Connection::new(Some(("address".to_string(), 22)));
    conn.sni = Some("address".to_string());
    conn
}

pub fn treq() -> Request {
    let mut req = Request::new("GET", "http", "address", 22, "/path");
    req.headers = Headers::from([("header", "qvalue"), ("content-length", "7")]);
    req.content = Some(b"content".to_vec());
    req
}

pub fn tresp() -> Response {
    let mut resp = Response::new(200, "OK");
    resp.headers = Headers::from([("header-response", "svalue"), ("content-length", "7")]);
    resp.content = Some(b"message".to_vec());
    resp
}

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// HTTP flow with optional response, error and websocket messages
pub fn tflow(resp: bool, err: bool, ws: bool) -> Flow {
    let mut f = Flow::new_http(tclient_conn(), tserver_conn(), treq());
    if resp {
        f.set_response(tresp());
    }
    if err {
        f.error = Some(ErrorInfo::new("error"));
    }
    if ws {
        let mut data = WebSocketData::default();
        let mut m1 = WebSocketMessage::new(MessageType::Binary, true, b"hello binary");
        m1.timestamp = ts(946681203);
        let mut m2 = WebSocketMessage::new(MessageType::Text, true, b"hello text");
        m2.timestamp = ts(946681204);
        let mut m3 = WebSocketMessage::new(MessageType::Text, false, b"it's me");
        m3.timestamp = ts(946681205);
        data.push(m1);
        data.push(m2);
        data.push(m3);
        data.close(false, 1000, "Close Reason");
        if let FlowData::Http { websocket, .. } = &mut f.data {
            *websocket = Some(data);
        }
    }
    f
}

pub fn ttcpflow(err: bool) -> Flow {
    let mut f = Flow::new_tcp(tclient_conn(), tserver_conn());
    if let FlowData::Tcp { messages } = &mut f.data {
        messages.push(TcpMessage::new(true, b"hello"));
        messages.push(TcpMessage::new(false, b"it's me"));
    }
    if err {
        f.error = Some(ErrorInfo::new("error"));
    }
    f
}

pub fn tdnsflow(resp: bool, err: bool) -> Flow {
    let query = DnsMessage::query(42, "dns.google", "A");
    let answer = query.answer(vec![ResourceRecord {
        name: "dns.google".to_string(),
        record_type: "A".to_string(),
        class: "IN".to_string(),
        ttl: 32,
        data: "8.8.8.8".to_string(),
    }]);
    let mut f = Flow::new_dns(tclient_conn(), tserver_conn(), query);
    if resp {
        if let FlowData::Dns { response, .. } = &mut f.data {
            *response = Some(answer);
        }
    }
    if err {
        f.error = Some(ErrorInfo::new("error"));
    }
    f
}
