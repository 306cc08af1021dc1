use crate::ir::Function;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Registry of named native definitions, with lazy materialization
///
/// This is the symbol table the JIT linker consults. Compiled code refers to symbols that may
/// have no definition yet; the first time such a symbol is resolved, the registry invokes its
/// materialization callback, which demangles the name, loads whatever class metadata the request
/// needs, and produces a tiny definition. The result is published atomically: every resolver
/// either sees no definition yet (and triggers or waits on materialization) or sees the one
/// definition that won, never a torn state.
///
/// Materialization is at most once per symbol, ever. Concurrent first-resolutions of the same
/// symbol serialize: one caller runs the callback, the rest block until the definition is
/// published. A materializer may recursively resolve *other* symbols; a materializer that
/// resolves its own symbol deadlocks, by contract.
pub struct StubRegistry<'g> {
    materialize: Box<dyn Fn(&str) -> Option<Function> + 'g>,
    symbols: Mutex<HashMap<String, SymbolState>>,
    published: Condvar,
}

#[derive(Clone)]
enum SymbolState {
    /// Some thread is running the materialization callback for this symbol
    Materializing,
    Defined(Arc<Function>),
}

impl<'g> StubRegistry<'g> {
    pub fn new(materialize: impl Fn(&str) -> Option<Function> + 'g) -> StubRegistry<'g> {
        StubRegistry {
            materialize: Box::new(materialize),
            symbols: Mutex::new(HashMap::new()),
            published: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SymbolState>> {
        self.symbols
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The definition of `symbol`, materializing it on first resolution
    ///
    /// Returns `None` for symbols the materialization callback does not recognize.
    pub fn resolve(&self, symbol: &str) -> Option<Arc<Function>> {
        let mut symbols = self.lock();
        loop {
            match symbols.get(symbol) {
                Some(SymbolState::Defined(function)) => return Some(function.clone()),
                Some(SymbolState::Materializing) => {
                    symbols = self
                        .published
                        .wait(symbols)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                None => break,
            }
        }
        symbols.insert(symbol.to_owned(), SymbolState::Materializing);
        drop(symbols);

        log::trace!("materializing stub symbol '{}'", symbol);
        let definition = (self.materialize)(symbol).map(Arc::new);

        let mut symbols = self.lock();
        match &definition {
            Some(function) => {
                symbols.insert(symbol.to_owned(), SymbolState::Defined(function.clone()));
            }
            None => {
                symbols.remove(symbol);
            }
        }
        self.published.notify_all();
        definition
    }

    /// Register a definition directly (used for freshly compiled methods)
    ///
    /// The first definition of a symbol wins; a duplicate is dropped and the existing definition
    /// returned.
    pub fn define(&self, symbol: impl Into<String>, function: Function) -> Arc<Function> {
        let symbol = symbol.into();
        let mut symbols = self.lock();
        if let Some(SymbolState::Defined(existing)) = symbols.get(&symbol) {
            log::trace!("dropping duplicate definition of '{}'", symbol);
            return existing.clone();
        }
        let function = Arc::new(function);
        symbols.insert(symbol, SymbolState::Defined(function.clone()));
        self.published.notify_all();
        function
    }

    /// The current definition of `symbol`, without triggering materialization
    pub fn definition(&self, symbol: &str) -> Option<Arc<Function>> {
        match self.lock().get(symbol) {
            Some(SymbolState::Defined(function)) => Some(function.clone()),
            _ => None,
        }
    }
}
