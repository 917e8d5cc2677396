//! Splitting message lists into broadcastable pieces.

/// Split `items` into consecutive chunks of at most `chunk_size` elements,
/// preserving order. A size of 0 is treated as 1.
pub fn chunk_messages<T: Clone>(items: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Split a list into two halves. The first half gets the extra element when
/// the length is odd.
pub(crate) fn split_in_half<T: Clone>(items: &[T]) -> (Vec<T>, Vec<T>) {
    let mut chunks = chunk_messages(items, (items.len() + 1) / 2).into_iter();
    let first = chunks.next().unwrap_or_default();
    let second = chunks.next().unwrap_or_default();
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_spot_checks() {
        let items: Vec<u32> = (0..7).collect();
        assert_eq!(
            chunk_messages(&items, 3),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
        assert_eq!(chunk_messages(&items, 0).len(), 7);
        assert!(chunk_messages::<u32>(&[], 5).is_empty());
    }

    #[test]
    fn halves() {
        assert_eq!(split_in_half(&[1, 2, 3]), (vec![1, 2], vec![3]));
        assert_eq!(split_in_half(&[1, 2, 3, 4]), (vec![1, 2], vec![3, 4]));
        assert_eq!(split_in_half(&[1]), (vec![1], vec![]));
        assert_eq!(split_in_half::<u8>(&[]), (vec![], vec![]));
    }

    quickcheck::quickcheck! {
        fn chunks_preserve_order(items: Vec<u8>, size: usize) -> bool {
            let size = size % 20;
            let chunks = chunk_messages(&items, size);
            let flat: Vec<u8> = chunks.iter().flatten().copied().collect();
            let expected_chunks = (items.len() + size.max(1) - 1) / size.max(1);
            flat == items
                && chunks.len() == expected_chunks
                && chunks.iter().all(|c| !c.is_empty() && c.len() <= size.max(1))
        }

        fn halves_are_balanced(items: Vec<u8>) -> bool {
            let (first, second) = split_in_half(&items);
            let mut joined = first.clone();
            joined.extend_from_slice(&second);
            joined == items && first.len() >= second.len() && first.len() - second.len() <= 1
        }
    }
}
