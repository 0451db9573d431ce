//! Owned statement handles that notify dependents about their lifecycle.
//!
//! A [`StatementHandle`] publishes [`HandleEvent::AboutToFree`] before the driver statement is
//! released, and [`HandleEvent::ParamsReset`] / [`HandleEvent::ColumnsUnbound`] after the
//! corresponding driver call succeeded. Column buffers subscribe when they bind, so they never
//! touch a statement that is gone and never unbind twice.

use std::cell::RefCell;
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::driver::{
    BindTarget, DescField, Descriptor, FetchOrientation, ParameterTarget, Statement,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandleId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleEvent {
    AboutToFree,
    ParamsReset,
    ColumnsUnbound,
}

/// A dependent of a statement handle.
///
/// Observers are notified while the handle is mutably borrowed and must not call back into it.
pub trait HandleObserver {
    fn on_handle_event(&self, handle: HandleId, event: HandleEvent);
}

pub type SharedStatement = Rc<RefCell<StatementHandle>>;

pub struct StatementHandle {
    id: HandleId,
    name: &'static str,
    stmt: Option<Box<dyn Statement>>,
    observers: Vec<Weak<dyn HandleObserver>>,
    cursor_open: bool,
}

impl StatementHandle {
    pub fn new(stmt: Box<dyn Statement>, name: &'static str) -> Self {
        Self {
            id: HandleId::next(),
            name,
            stmt: Some(stmt),
            observers: Vec::new(),
            cursor_open: false,
        }
    }

    pub fn shared(stmt: Box<dyn Statement>, name: &'static str) -> SharedStatement {
        Rc::new(RefCell::new(Self::new(stmt, name)))
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_allocated(&self) -> bool {
        self.stmt.is_some()
    }

    pub fn is_cursor_open(&self) -> bool {
        self.cursor_open
    }

    /// Registers `observer`; registering the same observer twice has no effect.
    pub fn subscribe(&mut self, observer: Weak<dyn HandleObserver>) {
        self.observers.retain(|o| o.strong_count() > 0);
        if !self.observers.iter().any(|o| Weak::ptr_eq(o, &observer)) {
            self.observers.push(observer);
        }
    }

    fn notify(&mut self, event: HandleEvent) {
        let id = self.id;
        self.observers.retain(|observer| match observer.upgrade() {
            Some(observer) => {
                observer.on_handle_event(id, event);
                true
            }
            None => false,
        });
    }

    fn statement(&mut self) -> Result<&mut dyn Statement> {
        match self.stmt.as_deref_mut() {
            Some(stmt) => Ok(stmt),
            None => Err(Error::precondition(format!(
                "{} statement handle has been freed",
                self.name
            ))),
        }
    }

    /// # Safety
    /// See [`Statement::bind_col`].
    pub unsafe fn bind_col(&mut self, column: u16, target: BindTarget) -> Result<()> {
        self.statement()?.bind_col(column, target)
    }

    /// # Safety
    /// See [`Statement::bind_parameter`].
    pub unsafe fn bind_parameter(&mut self, parameter: u16, target: ParameterTarget) -> Result<()> {
        self.statement()?.bind_parameter(parameter, target)
    }

    /// # Safety
    /// See [`Statement::set_desc_field`].
    pub unsafe fn set_desc_field(
        &mut self,
        descriptor: Descriptor,
        record: u16,
        field: DescField,
    ) -> Result<()> {
        self.statement()?.set_desc_field(descriptor, record, field)
    }

    pub fn set_cursor_scrollable(&mut self, scrollable: bool) -> Result<()> {
        self.statement()?.set_cursor_scrollable(scrollable)
    }

    /// Executes `sql` without preparing it. `opens_cursor` records whether a result set is
    /// expected, so [`close_cursor`](Self::close_cursor) knows whether there is work to do.
    pub fn exec_direct(&mut self, sql: &str, opens_cursor: bool) -> Result<()> {
        log::debug!("{}: executing {}", self.name, sql);
        self.statement()?.exec_direct(sql)?;
        self.cursor_open = opens_cursor;
        Ok(())
    }

    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        log::debug!("{}: preparing {}", self.name, sql);
        self.statement()?.prepare(sql)
    }

    pub fn execute(&mut self) -> Result<()> {
        self.statement()?.execute()
    }

    pub fn fetch(&mut self, orientation: FetchOrientation) -> Result<bool> {
        if !self.cursor_open {
            return Err(Error::precondition(format!(
                "{}: fetch without an open cursor",
                self.name
            )));
        }
        self.statement()?.fetch_scroll(orientation)
    }

    pub fn close_cursor(&mut self) -> Result<()> {
        if !self.cursor_open {
            return Ok(());
        }
        self.statement()?.close_cursor()?;
        self.cursor_open = false;
        Ok(())
    }

    pub fn row_count(&mut self) -> Result<i64> {
        self.statement()?.row_count()
    }

    pub fn reset_params(&mut self) -> Result<()> {
        self.statement()?.reset_parameters()?;
        self.notify(HandleEvent::ParamsReset);
        Ok(())
    }

    pub fn unbind_columns(&mut self) -> Result<()> {
        self.statement()?.unbind_cols()?;
        self.notify(HandleEvent::ColumnsUnbound);
        Ok(())
    }

    /// Releases the driver statement. Observers are told before it goes away.
    pub fn free(&mut self) {
        if self.stmt.is_none() {
            return;
        }
        self.notify(HandleEvent::AboutToFree);
        self.stmt = None;
        self.cursor_open = false;
        self.observers.clear();
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        self.free();
    }
}

impl Debug for StatementHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("allocated", &self.stmt.is_some())
            .field("cursor_open", &self.cursor_open)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Connection;
    use crate::mem::MemConnection;
    use std::cell::Cell;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<HandleEvent>>,
        freed_while_allocated: Cell<bool>,
    }

    impl HandleObserver for Recorder {
        fn on_handle_event(&self, _handle: HandleId, event: HandleEvent) {
            self.events.borrow_mut().push(event);
        }
    }

    fn handle() -> StatementHandle {
        let conn = MemConnection::new();
        StatementHandle::new(conn.allocate_statement().unwrap(), "test")
    }

    #[test]
    fn observers_hear_reset_and_unbind_once() {
        let recorder = Rc::new(Recorder::default());
        let mut handle = handle();
        let observer: Weak<dyn HandleObserver> = Rc::downgrade(&recorder) as Weak<dyn HandleObserver>;
        handle.subscribe(observer.clone());
        handle.subscribe(observer);

        handle.reset_params().unwrap();
        handle.unbind_columns().unwrap();

        assert_eq!(
            *recorder.events.borrow(),
            vec![HandleEvent::ParamsReset, HandleEvent::ColumnsUnbound]
        );
    }

    #[test]
    fn free_notifies_before_release_and_only_once() {
        let recorder = Rc::new(Recorder::default());
        {
            let mut handle = handle();
            handle.subscribe(Rc::downgrade(&recorder) as Weak<dyn HandleObserver>);
            handle.free();
            recorder.freed_while_allocated.set(handle.is_allocated());
            assert!(handle.exec_direct("SELECT 1", true).unwrap_err().is_precondition());
        }

        assert_eq!(*recorder.events.borrow(), vec![HandleEvent::AboutToFree]);
        assert!(!recorder.freed_while_allocated.get());
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let mut handle = handle();
        {
            let recorder = Rc::new(Recorder::default());
            handle.subscribe(Rc::downgrade(&recorder) as Weak<dyn HandleObserver>);
        }
        handle.reset_params().unwrap();
        assert_eq!(handle.observers.len(), 0);
    }
}
