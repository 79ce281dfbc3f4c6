use crate::backend::{PixmapHandle, SurfaceBinding, TextureFormat, TextureId, TextureTarget};
use crate::error::{CompositorError, Result};
use crate::events::{WindowGeometry, WindowHandle};
use tracing::debug;

/// Окно, поверхность которого привязана к текстуре
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedWindow {
    pub handle: WindowHandle,
    pub geometry: WindowGeometry,
    pub pixmap: PixmapHandle,
    pub binding: SurfaceBinding,
    pub texture: TextureId,
    pub target: TextureTarget,
    pub format: TextureFormat,
}

/// Окна, которые никогда не компонуются: root, overlay и собственный холст
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedHandles {
    pub root: WindowHandle,
    pub overlay: WindowHandle,
    pub canvas: WindowHandle,
}

impl ReservedHandles {
    pub fn contains(&self, window: WindowHandle) -> bool {
        window == self.root || window == self.overlay || window == self.canvas
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { slot: usize },
    AlreadyTracked { slot: usize },
    Reserved,
}

/// Таблица окон фиксированной ёмкости.
///
/// Слоты заполняются первым свободным, поэтому порядок слотов
/// приблизительно совпадает с порядком создания. Таблица не растёт.
#[derive(Debug)]
pub struct WindowTable {
    slots: Box<[Option<TrackedWindow>]>,
    reserved: ReservedHandles,
}

impl WindowTable {
    pub fn new(capacity: usize, reserved: ReservedHandles) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            reserved,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn slot_of(&self, window: WindowHandle) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| t.handle == window))
    }

    pub fn contains(&self, window: WindowHandle) -> bool {
        self.slot_of(window).is_some()
    }

    pub fn get(&self, window: WindowHandle) -> Option<&TrackedWindow> {
        self.slot_of(window).and_then(|i| self.slots[i].as_ref())
    }

    /// Привязывает окно в первый свободный слот.
    ///
    /// `bind` вызывается только когда слот найден; при его ошибке таблица не меняется.
    pub fn add<F>(&mut self, window: WindowHandle, bind: F) -> Result<AddOutcome>
    where
        F: FnOnce(WindowHandle) -> Result<TrackedWindow>,
    {
        if self.reserved.contains(window) {
            return Ok(AddOutcome::Reserved);
        }

        if let Some(slot) = self.slot_of(window) {
            return Ok(AddOutcome::AlreadyTracked { slot });
        }

        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(CompositorError::Capacity {
                capacity: self.capacity(),
            })?;

        let tracked = bind(window)?;
        debug!("[WindowTable] Окно {} добавлено в слот {}", window, slot);
        self.slots[slot] = Some(tracked);
        Ok(AddOutcome::Added { slot })
    }

    /// Освобождает ресурсы окна через `release` и обнуляет слот.
    pub fn remove<F>(&mut self, window: WindowHandle, release: F) -> Result<usize>
    where
        F: FnOnce(TrackedWindow),
    {
        let slot = self
            .slot_of(window)
            .ok_or(CompositorError::NotFound(window))?;

        if let Some(tracked) = self.slots[slot].take() {
            release(tracked);
        }
        debug!("[WindowTable] Окно {} удалено из слота {}", window, slot);
        Ok(slot)
    }

    /// Перепривязывает окно в том же слоте.
    ///
    /// `rebind` получает старую запись и обязан освободить её ресурсы до
    /// новой привязки; если она не удалась, слот остаётся пустым.
    pub fn rebind<F>(&mut self, window: WindowHandle, rebind: F) -> Result<usize>
    where
        F: FnOnce(TrackedWindow) -> Result<TrackedWindow>,
    {
        let slot = self
            .slot_of(window)
            .ok_or(CompositorError::NotFound(window))?;

        let Some(old) = self.slots[slot].take() else {
            return Err(CompositorError::NotFound(window));
        };
        self.slots[slot] = Some(rebind(old)?);
        debug!("[WindowTable] Окно {} перепривязано в слоте {}", window, slot);
        Ok(slot)
    }

    /// Обновляет закэшированную позицию без перепривязки
    pub fn move_to(&mut self, window: WindowHandle, x: i32, y: i32) -> Result<()> {
        let slot = self
            .slot_of(window)
            .ok_or(CompositorError::NotFound(window))?;
        if let Some(tracked) = self.slots[slot].as_mut() {
            tracked.geometry.x = x;
            tracked.geometry.y = y;
        }
        Ok(())
    }

    /// Занятые слоты в порядке слотов
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TrackedWindow)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|t| (i, t)))
    }

    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&TrackedWindow),
    {
        for (_, tracked) in self.iter() {
            visitor(tracked);
        }
    }

    /// Освобождает все окна; используется при закрытии сессии
    pub fn clear<F>(&mut self, mut release: F)
    where
        F: FnMut(TrackedWindow),
    {
        for slot in self.slots.iter_mut() {
            if let Some(tracked) = slot.take() {
                release(tracked);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESERVED: ReservedHandles = ReservedHandles {
        root: WindowHandle(1),
        overlay: WindowHandle(2),
        canvas: WindowHandle(3),
    };

    fn tracked(window: WindowHandle) -> Result<TrackedWindow> {
        Ok(TrackedWindow {
            handle: window,
            geometry: WindowGeometry::new(200, 100, 24),
            pixmap: PixmapHandle(window.0 + 1000),
            binding: SurfaceBinding(window.0 as u64 + 2000),
            texture: TextureId(window.0),
            target: TextureTarget::Rectangle,
            format: TextureFormat::Rgb,
        })
    }

    fn handles(table: &WindowTable) -> Vec<u32> {
        table.iter().map(|(_, t)| t.handle.0).collect()
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut table = WindowTable::new(7, RESERVED);
        for id in 10..17 {
            assert!(matches!(
                table.add(WindowHandle(id), tracked).unwrap(),
                AddOutcome::Added { .. }
            ));
        }

        let mut bound = false;
        let result = table.add(WindowHandle(17), |w| {
            bound = true;
            tracked(w)
        });
        assert!(matches!(result, Err(CompositorError::Capacity { capacity: 7 })));
        assert!(!bound);
        assert_eq!(table.len(), 7);
    }

    #[test]
    fn test_duplicate_add_keeps_single_entry() {
        let mut table = WindowTable::new(7, RESERVED);
        table.add(WindowHandle(10), tracked).unwrap();
        let outcome = table.add(WindowHandle(10), tracked).unwrap();
        assert_eq!(outcome, AddOutcome::AlreadyTracked { slot: 0 });
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reserved_handles_are_ignored() {
        let mut table = WindowTable::new(7, RESERVED);
        for id in 1..=3 {
            assert_eq!(table.add(WindowHandle(id), tracked).unwrap(), AddOutcome::Reserved);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_missing_is_not_found_and_idempotent() {
        let mut table = WindowTable::new(7, RESERVED);
        table.add(WindowHandle(10), tracked).unwrap();

        let mut released = Vec::new();
        assert_eq!(table.remove(WindowHandle(10), |t| released.push(t.texture)).unwrap(), 0);
        assert_eq!(released, vec![TextureId(10)]);

        let second = table.remove(WindowHandle(10), |t| released.push(t.texture));
        assert!(matches!(second, Err(CompositorError::NotFound(WindowHandle(10)))));
        assert_eq!(released.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_freed_slot_is_reused_first_fit() {
        let mut table = WindowTable::new(7, RESERVED);
        table.add(WindowHandle(10), tracked).unwrap();
        table.remove(WindowHandle(10), |_| {}).unwrap();
        assert_eq!(
            table.add(WindowHandle(11), tracked).unwrap(),
            AddOutcome::Added { slot: 0 }
        );
        assert_eq!(handles(&table), vec![11]);
    }

    #[test]
    fn test_failed_bind_leaves_table_unchanged() {
        let mut table = WindowTable::new(7, RESERVED);
        table.add(WindowHandle(10), tracked).unwrap();
        let result = table.add(WindowHandle(11), |_| Err(CompositorError::InvalidTarget(0x20DB)));
        assert!(matches!(result, Err(CompositorError::InvalidTarget(_))));
        assert_eq!(handles(&table), vec![10]);
    }

    #[test]
    fn test_iteration_order_is_slot_order() {
        let mut table = WindowTable::new(7, RESERVED);
        for id in [30, 20, 40, 10] {
            table.add(WindowHandle(id), tracked).unwrap();
        }
        table.remove(WindowHandle(20), |_| {}).unwrap();
        table.add(WindowHandle(50), tracked).unwrap();

        let first = handles(&table);
        assert_eq!(first, vec![30, 50, 40, 10]);

        let mut visited = Vec::new();
        table.for_each(|t| visited.push(t.handle.0));
        assert_eq!(visited, first);
    }

    #[test]
    fn test_rebind_keeps_slot() {
        let mut table = WindowTable::new(7, RESERVED);
        table.add(WindowHandle(10), tracked).unwrap();
        table.add(WindowHandle(11), tracked).unwrap();
        table.remove(WindowHandle(10), |_| {}).unwrap();

        let mut released = Vec::new();
        let slot = table
            .rebind(WindowHandle(11), |old| {
                released.push(old.texture);
                let mut fresh = tracked(old.handle)?;
                fresh.texture = TextureId(99);
                Ok(fresh)
            })
            .unwrap();
        assert_eq!(slot, 1);
        assert_eq!(released, vec![TextureId(11)]);
        assert_eq!(table.get(WindowHandle(11)).unwrap().texture, TextureId(99));

        let failed = table.rebind(WindowHandle(11), |_| Err(CompositorError::InvalidTarget(0)));
        assert!(failed.is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_move_and_clear() {
        let mut table = WindowTable::new(2, RESERVED);
        table.add(WindowHandle(10), tracked).unwrap();
        table.add(WindowHandle(11), tracked).unwrap();
        table.move_to(WindowHandle(11), 15, 25).unwrap();
        let geometry = table.get(WindowHandle(11)).unwrap().geometry;
        assert_eq!((geometry.x, geometry.y), (15, 25));
        assert!(table.move_to(WindowHandle(12), 0, 0).is_err());

        let mut released = 0;
        table.clear(|_| released += 1);
        assert_eq!(released, 2);
        assert!(table.is_empty());
    }
}
