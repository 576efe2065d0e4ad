use crate::{Error, Result};
use std::borrow::Cow;

pub fn separated_by<T, F>(
    out: &mut String,
    values: impl IntoIterator<Item = T>,
    mut f: F,
    separator: &str,
) where
    F: FnMut(&mut String, T),
{
    let mut len = out.len();
    for v in values {
        if out.len() > len {
            out.push_str(separator);
        }
        len = out.len();
        f(out, v);
    }
}

pub fn consume_while<'s>(input: &mut &'s str, predicate: impl FnMut(&char) -> bool) -> &'s str {
    let len: usize = input
        .chars()
        .take_while(predicate)
        .map(char::len_utf8)
        .sum();
    if len == 0 {
        return "";
    }
    let result = &input[..len];
    *input = &input[len..];
    result
}

/// Longest prefix of `value` not exceeding `max` bytes, cut on a char boundary.
pub fn truncated(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Last path segment of a type name, generics stripped: `a::b::Foo<c::Bar>` is `Foo`.
pub fn short_type_name(name: &str) -> &str {
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or(name)
}

/// Something that can be referenced by an explicit order list.
pub trait Labeled {
    fn label(&self) -> &str;
}

/// Sort `items` following the `order` override.
///
/// Every key must name exactly one item, listed items come first in the
/// override order, the remaining ones keep their default relative order.
pub fn order_by_labels<T: Labeled>(
    items: Vec<T>,
    order: Option<&[Cow<'static, str>]>,
    site: &str,
    what: &str,
) -> Result<Vec<T>> {
    let Some(order) = order else {
        return Ok(items);
    };
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut result = Vec::with_capacity(slots.len());
    for key in order {
        let mut matching = slots
            .iter()
            .enumerate()
            .filter(|(_, v)| v.as_ref().is_some_and(|v| v.label() == key.as_ref()))
            .map(|(i, _)| i);
        let (Some(index), None) = (matching.next(), matching.next()) else {
            let count = slots
                .iter()
                .flatten()
                .filter(|v| v.label() == key.as_ref())
                .count();
            return Err(Error::configuration(
                site,
                if count == 0 {
                    format!("the {what} order names `{key}` which is not declared (or listed twice)")
                } else {
                    format!("the {what} order key `{key}` is ambiguous, it matches {count} {what}s")
                },
            ));
        };
        if let Some(item) = slots[index].take() {
            result.push(item);
        }
    }
    result.extend(slots.into_iter().flatten());
    Ok(result)
}

#[macro_export]
macro_rules! truncate_long {
    ($query:expr) => {
        format_args!(
            "{}{}",
            $crate::truncated(&$query, 497).trim_end(),
            if $query.len() > 497 { "..." } else { "" },
        )
    };
}
