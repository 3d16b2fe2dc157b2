// Буфер переупорядочивания чанков на стороне получателя
//
// Чанк с индексом `next <= seq < next + window` принимается и ждёт своей
// очереди. Всё, что ниже `next` (повтор) или за окном, - SequenceError.

use crate::utils::error::{Result, ShareError};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    window: u32,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(window: u32) -> Self {
        Self {
            next: 0,
            window: window.max(1),
            pending: BTreeMap::new(),
        }
    }

    /// Индекс следующего ожидаемого чанка
    pub fn next_expected(&self) -> u64 {
        self.next
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Сколько чанков ждут пропущенных соседей
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Принять чанк и вернуть всё, что теперь можно обработать по порядку
    pub fn insert(&mut self, sequence_index: u64, item: T) -> Result<Vec<T>> {
        let upper = self.next.saturating_add(u64::from(self.window));
        if sequence_index < self.next
            || sequence_index >= upper
            || self.pending.contains_key(&sequence_index)
        {
            return Err(ShareError::SequenceError {
                expected: self.next,
                got: sequence_index,
                window: self.window,
            });
        }

        self.pending.insert(sequence_index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        Ok(ready)
    }

    /// Выбросить всё недообработанное (отмена, ошибка)
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_passes_through() {
        let mut buffer = ReorderBuffer::new(4);
        assert_eq!(buffer.insert(0, "a").unwrap(), vec!["a"]);
        assert_eq!(buffer.insert(1, "b").unwrap(), vec!["b"]);
        assert_eq!(buffer.next_expected(), 2);
    }

    #[test]
    fn test_gap_is_held_until_filled() {
        let mut buffer = ReorderBuffer::new(4);
        assert_eq!(buffer.insert(0, 0).unwrap(), vec![0]);
        assert!(buffer.insert(2, 2).unwrap().is_empty());
        assert_eq!(buffer.buffered(), 1);
        assert_eq!(buffer.insert(1, 1).unwrap(), vec![1, 2]);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_replay_is_rejected() {
        let mut buffer = ReorderBuffer::new(4);
        buffer.insert(0, ()).unwrap();
        assert!(matches!(
            buffer.insert(0, ()),
            Err(ShareError::SequenceError { expected: 1, got: 0, window: 4 })
        ));
    }

    #[test]
    fn test_duplicate_inside_window_is_rejected() {
        let mut buffer = ReorderBuffer::new(4);
        buffer.insert(2, ()).unwrap();
        assert!(buffer.insert(2, ()).is_err());
    }

    #[test]
    fn test_window_edge() {
        let mut buffer = ReorderBuffer::new(4);
        assert!(buffer.insert(3, ()).is_ok());
        assert!(matches!(
            buffer.insert(4, ()),
            Err(ShareError::SequenceError { expected: 0, got: 4, window: 4 })
        ));
    }
}
