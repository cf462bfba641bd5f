//! Splitting the input differently must never change the events.

use std::sync::Once;

use md_events::{to_events, Event, Session};
use pretty_assertions::assert_eq;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests (only runs once even if called multiple times)
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

const DOCUMENT: &str = "\
# Streaming *markdown*

Setext *title*
---

Some **bold**, some _em_, a `code span`, ~~gone~~ and a [link](https://example.com/a_(b)).
A soft break with snake_case and 2 * 3 = 6.

> quoted **text**
lazy line

- item one
- item `two`
  - nested ![img](i.png)
1. first
2. second

| left | right |
|:-----|------:|
| a    | *b*   |
| c \\| d |

```rust
fn main() { println!(\"*not emphasis*\"); }
```

---
café ✓ \\*escaped\\* and `` a ` b ``
";

fn feed(fragments: &[&str]) -> Vec<Event> {
    let mut session = Session::new(Vec::new());
    for fragment in fragments {
        session.add(fragment).unwrap();
    }
    session.flush().unwrap();
    session.into_sink()
}

fn boundaries(text: &str) -> Vec<usize> {
    (0..=text.len())
        .filter(|&i| text.is_char_boundary(i))
        .collect()
}

#[test]
fn test_every_two_way_split() {
    init_tracing();
    let whole = to_events(DOCUMENT);

    for at in boundaries(DOCUMENT) {
        let (head, tail) = DOCUMENT.split_at(at);
        assert_eq!(feed(&[head, tail]), whole, "split at byte {}", at);
    }
}

#[test]
fn test_char_by_char() {
    init_tracing();
    let chars: Vec<String> = DOCUMENT.chars().map(String::from).collect();
    let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
    assert_eq!(feed(&fragments), to_events(DOCUMENT));
}

#[test]
fn test_every_three_way_split_of_short_input() {
    init_tracing();
    let input = "**a `b` *c*** ~~d~~\n- [e](f)\n";
    let whole = to_events(input);
    let cuts = boundaries(input);

    for (n, &i) in cuts.iter().enumerate() {
        for &j in &cuts[n..] {
            let fragments = [&input[..i], &input[i..j], &input[j..]];
            assert_eq!(feed(&fragments), whole, "split at {} and {}", i, j);
        }
    }
}

#[test]
fn test_byte_split_inside_utf8_sequences() {
    init_tracing();
    let whole = to_events(DOCUMENT);
    let bytes = DOCUMENT.as_bytes();

    for at in 0..=bytes.len() {
        let mut session = Session::new(Vec::new());
        session.add_bytes(&bytes[..at]).unwrap();
        session.add_bytes(&bytes[at..]).unwrap();
        session.flush().unwrap();
        assert_eq!(session.into_sink(), whole, "byte split at {}", at);
    }
}
