//! Shared fixtures: fake mails and on-disk containers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static BOX_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Builder for deterministic fake mail messages.
///
/// Defaults produce byte-identical duplicates; override individual fields to
/// introduce controlled differences.
#[derive(Clone)]
pub struct MailFactory {
    pub date: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub message_id: String,
    pub body: String,
}

impl Default for MailFactory {
    fn default() -> Self {
        Self {
            date: "Wed, 23 Nov 2011 11:11:11 +0000".to_string(),
            from: "foo@bar.com".to_string(),
            to: "baz".to_string(),
            subject: "A duplicate mail".to_string(),
            message_id: "<201111231111.abcdef101@mail.nohost.com>".to_string(),
            body: "Да, они летят.".to_string(),
        }
    }
}

impl MailFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn message_id(mut self, message_id: &str) -> Self {
        self.message_id = message_id.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    /// Full rendered content of the mail.
    pub fn render(&self) -> Vec<u8> {
        format!(
            "Return-path: <none@nohost.com>\n\
             Envelope-to: me@host.com\n\
             Delivery-date: {date}\n\
             Received: from [11.11.11.11] (helo=nope.com)\n\
             \tby host.com with esmtp (Exim 4.80)\n\
             \t(envelope-from <noone@nohost.com>)\n\
             \tid 1CX8OJ-0014c9-Ii\n\
             \tfor me@host.com; {date}\n\
             Date: {date}\n\
             From: {from}\n\
             Message-Id: {message_id}\n\
             To: {to}\n\
             Subject: {subject}\n\
             Mime-Version: 1.0\n\
             Content-Type: text/plain; charset=\"utf-8\"\n\
             Content-Transfer-Encoding: 8bit\n\
             \n\
             {body}",
            date = self.date,
            from = self.from,
            message_id = self.message_id,
            to = self.to,
            subject = self.subject,
            body = self.body,
        )
        .into_bytes()
    }
}

/// Create a maildir under `dir` populated with the rendered mails.
pub fn make_maildir(dir: &Path, mails: &[&MailFactory]) -> PathBuf {
    let root = dir.join(format!("box-{}", BOX_COUNTER.fetch_add(1, Ordering::Relaxed)));
    for subdir in ["cur", "new", "tmp"] {
        std::fs::create_dir_all(root.join(subdir)).unwrap();
    }
    for (index, mail) in mails.iter().enumerate() {
        std::fs::write(root.join("cur").join(format!("mail-{index:03}")), mail.render()).unwrap();
    }
    root
}

/// Create an mbox file under `dir` populated with the rendered mails.
pub fn make_mbox(dir: &Path, mails: &[&MailFactory]) -> PathBuf {
    let path = dir.join(format!(
        "box-{}.mbox",
        BOX_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let mut contents = Vec::new();
    for mail in mails {
        contents.extend_from_slice(b"From MAILER-DAEMON Wed Nov 23 11:11:11 2011\n");
        contents.extend_from_slice(&mail.render());
        contents.extend_from_slice(b"\n\n");
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// Number of mails left in a maildir (cur + new).
pub fn maildir_count(root: &Path) -> usize {
    ["cur", "new"]
        .iter()
        .map(|subdir| std::fs::read_dir(root.join(subdir)).unwrap().count())
        .sum()
}

/// Bodies of all mails left in a maildir, sorted.
pub fn maildir_bodies(root: &Path) -> Vec<String> {
    let mut bodies = Vec::new();
    for subdir in ["cur", "new"] {
        for entry in std::fs::read_dir(root.join(subdir)).unwrap() {
            let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            let body = contents
                .split_once("\n\n")
                .map(|(_, b)| b.to_string())
                .unwrap_or_default();
            bodies.push(body);
        }
    }
    bodies.sort();
    bodies
}
