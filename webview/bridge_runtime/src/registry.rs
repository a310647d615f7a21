// Both tables draw from one counter under one lock, so a token is never
// pending in both at once. Closures and adapters run after the guard drops.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::function::{Adapter, Binding};

pub type Token = usize;

pub type DispatchFn = Box<dyn FnOnce() + Send + 'static>;

struct BoundEntry {
    name: String,
    binding: Binding,
}

#[derive(Default)]
struct RegistryState {
    next: Token,
    dispatch: HashMap<Token, DispatchFn>,
    bindings: HashMap<Token, BoundEntry>,
    names: HashMap<String, Token>,
}

impl RegistryState {
    fn is_pending(&self, token: Token) -> bool {
        self.dispatch.contains_key(&token) || self.bindings.contains_key(&token)
    }

    /// Smallest free token at or above the counter, wrapping around at
    /// `Token::MAX`.
    fn allocate(&mut self) -> Token {
        let mut token = self.next;
        while self.is_pending(token) {
            token = token.wrapping_add(1);
        }
        self.next = token.wrapping_add(1);
        token
    }
}

#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next: Token) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next,
                ..RegistryState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_dispatch(&self, work: DispatchFn) -> Token {
        let mut state = self.lock();
        let token = state.allocate();
        state.dispatch.insert(token, work);
        log::debug!("dispatch token {token} allocated");
        token
    }

    pub fn take_dispatch(&self, token: Token) -> Option<DispatchFn> {
        self.lock().dispatch.remove(&token)
    }

    /// Stores `binding` under a fresh token and makes it the current binding
    /// for `name`. Returns the new token and the token it replaced, which
    /// stays pending until [`Registry::remove_binding`] releases it.
    pub fn insert_binding(&self, name: &str, binding: Binding) -> (Token, Option<Token>) {
        let mut state = self.lock();
        let token = state.allocate();
        state.bindings.insert(
            token,
            BoundEntry {
                name: name.to_string(),
                binding,
            },
        );
        let replaced = state.names.insert(name.to_string(), token);
        log::debug!("binding '{name}' allocated token {token}");
        (token, replaced)
    }

    pub fn lookup_binding(&self, token: Token) -> Option<Adapter> {
        self.lock()
            .bindings
            .get(&token)
            .map(|entry| entry.binding.adapter.clone())
    }

    pub fn binding_token(&self, name: &str) -> Option<Token> {
        self.lock().names.get(name).copied()
    }

    /// Releases a binding token. The name mapping is only dropped when it
    /// still points at `token`.
    pub fn remove_binding(&self, token: Token) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.bindings.remove(&token) else {
            return false;
        };

        if state.names.get(&entry.name) == Some(&token) {
            state.names.remove(&entry.name);
        }

        // Captured state may itself reach the registry when dropped.
        drop(state);
        drop(entry);
        true
    }

    pub fn remove_binding_named(&self, name: &str) -> Option<Token> {
        let mut state = self.lock();
        let token = state.names.remove(name)?;
        let entry = state.bindings.remove(&token);
        drop(state);
        drop(entry);
        Some(token)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        let dispatch = mem::take(&mut state.dispatch);
        let bindings = mem::take(&mut state.bindings);
        state.names.clear();
        drop(state);

        if !dispatch.is_empty() {
            log::debug!("abandoned {} pending dispatch closure(s)", dispatch.len());
        }
        drop(bindings);
    }

    pub fn pending_dispatches(&self) -> usize {
        self.lock().dispatch.len()
    }

    pub fn binding_count(&self) -> usize {
        self.lock().bindings.len()
    }
}
