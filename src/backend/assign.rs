use std::{cell::RefCell, marker::PhantomData};

use log::trace;

use super::Variable;
use crate::error::{OptimErr, Result};

/// Rewrites the value about to be assigned to a variable.
pub trait AssignHook {
    /// Called by `update` right before `new_value` is committed to `var`.
    ///
    /// # Arguments
    /// * `var` - The variable being written, still holding its old values.
    /// * `new_value` - The value about to be written, same length as `var`.
    fn rewrite(&self, var: &Variable, new_value: &mut [f32]);
}

thread_local! {
    static HOOKS: RefCell<Vec<Box<dyn AssignHook>>> = const { RefCell::new(Vec::new()) };
}

/// Keeps an assignment hook installed on the current thread.
///
/// Dropping the guard removes the hook along with any hook installed after it, the guard is
/// dropped on every exit path of the scope that holds it, unwinding included.
#[must_use = "the hook is removed as soon as the guard is dropped"]
pub struct HookGuard {
    depth: usize,
    // The hook lives in a thread local, so must the guard.
    _not_send: PhantomData<*const ()>,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        let depth = self.depth;
        let _ = HOOKS.try_with(|hooks| hooks.borrow_mut().truncate(depth));
        trace!(depth = depth; "assignment hook removed");
    }
}

/// Installs `hook` on top of the current thread's hook stack.
///
/// Hooks must not install other hooks from within `AssignHook::rewrite`.
///
/// # Arguments
/// * `hook` - The hook to apply to every `update` call until the guard is dropped.
///
/// # Returns
/// The guard that keeps the hook installed.
pub fn install<H: AssignHook + 'static>(hook: H) -> HookGuard {
    let depth = HOOKS.with(|hooks| {
        let mut hooks = hooks.borrow_mut();
        hooks.push(Box::new(hook));
        hooks.len() - 1
    });

    trace!(depth = depth; "assignment hook installed");

    HookGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// Returns the amount of hooks currently installed on this thread.
pub fn hook_depth() -> usize {
    HOOKS.with(|hooks| hooks.borrow().len())
}

/// Assigns `new_value` to `var`.
///
/// This is the only way optimizers write variables. Installed hooks see the value before it is
/// committed, the most recently installed first, then the result is rounded to the variable's
/// precision.
///
/// # Arguments
/// * `var` - The variable to write.
/// * `new_value` - Its new values.
///
/// # Errors
/// `OptimErr::SizeMismatch` if `new_value` is not as long as `var`, in which case `var` is untouched.
pub fn update(var: &mut Variable, mut new_value: Vec<f32>) -> Result<()> {
    if new_value.len() != var.len() {
        return Err(OptimErr::SizeMismatch {
            what: "assigned value",
            got: new_value.len(),
            expected: var.len(),
        });
    }

    HOOKS.with(|hooks| {
        for hook in hooks.borrow().iter().rev() {
            hook.rewrite(var, &mut new_value);
        }
    });

    var.dtype().round_slice(&mut new_value);
    var.commit(new_value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddOne;

    impl AssignHook for AddOne {
        fn rewrite(&self, _var: &Variable, new_value: &mut [f32]) {
            new_value.iter_mut().for_each(|v| *v += 1.);
        }
    }

    struct Double;

    impl AssignHook for Double {
        fn rewrite(&self, _var: &Variable, new_value: &mut [f32]) {
            new_value.iter_mut().for_each(|v| *v *= 2.);
        }
    }

    #[test]
    fn plain_update_commits() {
        let mut var = Variable::new("w", vec![0., 0.]);
        update(&mut var, vec![1., 2.]).unwrap();
        assert_eq!(var.values(), &[1., 2.]);
    }

    #[test]
    fn update_rejects_wrong_length() {
        let mut var = Variable::new("w", vec![0., 0.]);
        let err = update(&mut var, vec![1.]).unwrap_err();
        assert!(matches!(err, OptimErr::SizeMismatch { got: 1, expected: 2, .. }));
        assert_eq!(var.values(), &[0., 0.]);
    }

    #[test]
    fn hooks_apply_newest_first_and_are_scoped() {
        let mut var = Variable::new("w", vec![0.]);
        assert_eq!(hook_depth(), 0);

        {
            let _outer = install(AddOne);
            let _inner = install(Double);
            assert_eq!(hook_depth(), 2);

            // (3 * 2) + 1
            update(&mut var, vec![3.]).unwrap();
            assert_eq!(var.values(), &[7.]);
        }

        assert_eq!(hook_depth(), 0);
        update(&mut var, vec![3.]).unwrap();
        assert_eq!(var.values(), &[3.]);
    }

    #[test]
    fn dropping_an_outer_guard_removes_inner_hooks() {
        let outer = install(AddOne);
        let inner = install(Double);
        drop(outer);
        assert_eq!(hook_depth(), 0);
        drop(inner);
        assert_eq!(hook_depth(), 0);
    }

    #[test]
    fn guard_is_released_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = install(AddOne);
            panic!("boom");
        });

        assert!(result.is_err());
        assert_eq!(hook_depth(), 0);
    }
}
