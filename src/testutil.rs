//! Fixture helpers for unit tests: deterministic fake mails.

use std::rc::Rc;

use crate::config::Config;
use crate::model::message::Message;

/// Render a complete single-part mail with the default header set.
pub fn render_mail(date: &str, body: &str) -> Vec<u8> {
    format!(
        "Return-path: <none@nohost.com>\n\
         Date: {date}\n\
         From: foo@bar.com\n\
         To: <baz@qux.com>\n\
         Subject: A duplicate mail\n\
         Mime-Version: 1.0\n\
         Content-Type: text/plain; charset=\"utf-8\"\n\
         Message-Id: <201111231111.abcdef101@mail.nohost.com>\n\
         \n\
         {body}"
    )
    .into_bytes()
}

/// A mail with the given `Date` header value.
pub fn date_mail(id: &str, date: &str) -> Rc<Message> {
    let conf = Config::default();
    Rc::new(Message::from_raw(
        "/tmp/box",
        id,
        "/tmp/box",
        render_mail(date, "Hello I am a duplicate mail.\n"),
        &conf,
    ))
}

/// A mail whose body is exactly `size` bytes long.
pub fn sized_mail(id: &str, size: usize) -> Rc<Message> {
    assert!(size >= 1);
    let body = format!("{}\n", "x".repeat(size - 1));
    let conf = Config::default();
    Rc::new(Message::from_raw(
        "/tmp/box",
        id,
        "/tmp/box",
        render_mail("Thu, 04 Jan 2024 10:00:00 +0000", &body),
        &conf,
    ))
}

/// A mail originating from a specific container path.
pub fn mail_from(source: &str, id: &str, body: &str) -> Rc<Message> {
    let conf = Config::default();
    Rc::new(Message::from_raw(
        source,
        id,
        source,
        render_mail("Thu, 04 Jan 2024 10:00:00 +0000", body),
        &conf,
    ))
}

/// A mail parsed under a caller-supplied configuration.
pub fn mail_with_conf(id: &str, raw: Vec<u8>, conf: &Config) -> Rc<Message> {
    Rc::new(Message::from_raw("/tmp/box", id, "/tmp/box", raw, conf))
}
