/*
 * sanitize.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Data sanitizer.
//!
//! Tags URL-like strings in request data as [`SafeKind::Url`] so they can be
//! used verbatim in `src`/`href` attributes (notably `data:` image URIs,
//! which the URL filter would otherwise reject). The tags only matter in URL
//! attribute contexts; everywhere else a tagged value is escaped as plain
//! text.
//!
//! The walk uses an explicit stack, so arbitrarily deep data cannot exhaust
//! the call stack.

use std::collections::BTreeMap;

use crate::context::{SafeKind, SafeValue, Value};

/// Prefixes that mark a string as URL-like (case-sensitive).
pub const URL_PREFIXES: &[&str] = &["http://", "https://", "data:", "file://"];

pub fn is_url_like(s: &str) -> bool {
    URL_PREFIXES.iter().any(|prefix| s.starts_with(prefix))
}

/// Partially rebuilt container.
enum Frame {
    List {
        done: Vec<Value>,
        pending: std::vec::IntoIter<Value>,
    },
    Map {
        done: BTreeMap<String, Value>,
        key: String,
        pending: std::collections::btree_map::IntoIter<String, Value>,
    },
}

/// Return `value` with every URL-like string tagged as a safe URL.
///
/// Keys, list order and all non-string scalars are preserved; applying the
/// function twice gives the same result as applying it once.
pub fn sanitize(value: Value) -> Value {
    let mut stack: Vec<Frame> = Vec::new();
    let mut next = value;

    loop {
        // Descend until a finished value is produced.
        let mut finished = match next {
            Value::String(s) if is_url_like(&s) => Value::Safe(SafeValue::new(SafeKind::Url, s)),
            Value::List(items) => {
                let mut pending = items.into_iter();
                match pending.next() {
                    Some(first) => {
                        stack.push(Frame::List {
                            done: Vec::with_capacity(pending.len() + 1),
                            pending,
                        });
                        next = first;
                        continue;
                    }
                    None => Value::List(Vec::new()),
                }
            }
            Value::Map(map) => {
                let mut pending = map.into_iter();
                match pending.next() {
                    Some((key, first)) => {
                        stack.push(Frame::Map {
                            done: BTreeMap::new(),
                            key,
                            pending,
                        });
                        next = first;
                        continue;
                    }
                    None => Value::Map(BTreeMap::new()),
                }
            }
            other => other,
        };

        // Climb, storing the finished value in its parent, until a parent
        // still has children to visit.
        loop {
            match stack.pop() {
                None => return finished,
                Some(Frame::List { mut done, mut pending }) => {
                    done.push(finished);
                    match pending.next() {
                        Some(child) => {
                            stack.push(Frame::List { done, pending });
                            next = child;
                            break;
                        }
                        None => finished = Value::List(done),
                    }
                }
                Some(Frame::Map {
                    mut done,
                    key,
                    mut pending,
                }) => {
                    done.insert(key, finished);
                    match pending.next() {
                        Some((key, child)) => {
                            stack.push(Frame::Map { done, key, pending });
                            next = child;
                            break;
                        }
                        None => finished = Value::Map(done),
                    }
                }
            }
        }
    }
}
