use std::cell::RefCell;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::handle::{HandleEvent, HandleId, HandleObserver, SharedStatement, StatementHandle};

#[derive(Debug, Clone)]
pub(super) struct Bound {
    pub handle: Weak<RefCell<StatementHandle>>,
    pub id: HandleId,
    /// Column or parameter number, 1-based.
    pub number: u16,
}

impl Bound {
    pub fn new(handle: &SharedStatement, id: HandleId, number: u16) -> Self {
        Self {
            handle: Rc::downgrade(handle),
            id,
            number,
        }
    }

    pub fn upgrade(&self) -> Option<SharedStatement> {
        self.handle.upgrade()
    }
}

/// Where a column buffer is currently bound.
///
/// Shared with the statement handles it is bound to, which clear entries as they reset
/// parameters, unbind columns or go away.
#[derive(Debug, Default)]
pub(super) struct BindState {
    column: RefCell<Option<Bound>>,
    parameters: RefCell<SmallVec<[Bound; 2]>>,
}

impl BindState {
    pub fn column(&self) -> Option<Bound> {
        self.column.borrow().clone()
    }

    pub fn set_column(&self, bound: Option<Bound>) {
        *self.column.borrow_mut() = bound;
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.borrow().len()
    }

    pub fn has_parameter(&self, id: HandleId, number: u16) -> bool {
        self.parameters
            .borrow()
            .iter()
            .any(|p| p.id == id && p.number == number)
    }

    pub fn add_parameter(&self, bound: Bound) {
        self.parameters.borrow_mut().push(bound);
    }

    pub fn remove_parameter(&self, id: HandleId, number: u16) {
        self.parameters
            .borrow_mut()
            .retain(|p| !(p.id == id && p.number == number));
    }

    pub fn parameters(&self) -> SmallVec<[Bound; 2]> {
        self.parameters.borrow().clone()
    }
}

impl HandleObserver for BindState {
    fn on_handle_event(&self, handle: HandleId, event: HandleEvent) {
        let forget_column = matches!(event, HandleEvent::AboutToFree | HandleEvent::ColumnsUnbound);
        let forget_parameters = matches!(event, HandleEvent::AboutToFree | HandleEvent::ParamsReset);

        if forget_column {
            let mut column = self.column.borrow_mut();
            if column.as_ref().map_or(false, |c| c.id == handle) {
                *column = None;
            }
        }
        if forget_parameters {
            self.parameters.borrow_mut().retain(|p| p.id != handle);
        }
    }
}
