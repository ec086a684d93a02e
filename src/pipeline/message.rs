//! Human-readable summary phrasing for flushed buckets

use super::types::EventType;

/// Compose the notification message for one bucket
///
/// - one event: `alice liked your post`
/// - one actor repeating: `alice commented on your post 3 times`
/// - several actors: `alice and 2 others liked your post`
///
/// A single sampled actor only proves a single distinct actor when the cap
/// could have held more than one.
pub fn compose_message(
    event_type: EventType,
    count: u64,
    sample_actor_ids: &[String],
    sample_cap: usize,
) -> String {
    let verb = event_type.verb_phrase();

    let Some(first) = sample_actor_ids.first() else {
        return match count {
            1 => format!("someone {}", verb),
            n => format!("{} people {}", n, verb),
        };
    };

    if count <= 1 {
        return format!("{} {}", first, verb);
    }

    if sample_actor_ids.len() == 1 && sample_cap > 1 {
        return format!("{} {} {} times", first, verb, count);
    }

    let others = count - 1;
    let noun = if others == 1 { "other" } else { "others" };
    format!("{} and {} {} {}", first, others, noun, verb)
}
