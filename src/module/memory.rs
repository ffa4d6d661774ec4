//! An in-process [`Module`] implementation.
//!
//! Rows are stored in lock-free skip maps keyed by token, the way metadata tables are kept
//! elsewhere in the crate. Allocations and commits are appended to logs that tests inspect
//! afterwards. Commits can be made to fail for chosen methods to exercise the injector's abort
//! handling.

use std::{collections::HashMap, sync::Mutex};

use crossbeam_skiplist::SkipMap;

use crate::{
    metadata::{
        method::MethodDef,
        token::{TableId, Token, MAX_ROW},
    },
    module::{LoadState, Module, ModuleId, TokenRange},
    tokens::TokenRequest,
    Error, Result,
};

/// One accepted body replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Method whose body was replaced
    pub token: Token,
    /// The new body
    pub body: Vec<u8>,
    /// Local signature token committed with it
    pub locals: Option<Token>,
}

/// A module held entirely in memory.
///
/// # Examples
///
/// ```rust
/// use cilweave::metadata::method::{MethodAttributes, MethodDef};
/// use cilweave::metadata::token::Token;
/// use cilweave::module::{InMemoryModule, Module, ModuleId};
///
/// let def = MethodDef {
///     token: Token::new(0x0600_0001),
///     declaring_type: "Shop.Cart".into(),
///     name: "Clear".into(),
///     flags: MethodAttributes::empty(),
///     impl_flags: 0,
///     declaring_type_is_value: false,
///     signature: vec![0x20, 0x00, 0x01],
/// };
/// let module = InMemoryModule::new(ModuleId(1), "Shop").with_method(def, vec![0x06, 0x2A]);
///
/// assert_eq!(module.enumerate_methods()?.len(), 1);
/// assert_eq!(module.method_body(Token::new(0x0600_0001))?, vec![0x06, 0x2A]);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub struct InMemoryModule {
    id: ModuleId,
    name: String,
    state: Mutex<LoadState>,
    methods: SkipMap<Token, MethodDef>,
    bodies: SkipMap<Token, Vec<u8>>,
    blobs: SkipMap<Token, Vec<u8>>,
    type_names: SkipMap<Token, String>,
    user_strings: SkipMap<Token, String>,
    rows: Mutex<HashMap<TableId, u32>>,
    rejected: SkipMap<Token, String>,
    allocations: boxcar::Vec<(Token, TokenRequest)>,
    commits: boxcar::Vec<CommitRecord>,
}

impl InMemoryModule {
    /// Create an empty module
    #[must_use]
    pub fn new(id: ModuleId, name: &str) -> Self {
        InMemoryModule {
            id,
            name: name.to_string(),
            state: Mutex::new(LoadState::Loaded),
            methods: SkipMap::new(),
            bodies: SkipMap::new(),
            blobs: SkipMap::new(),
            type_names: SkipMap::new(),
            user_strings: SkipMap::new(),
            rows: Mutex::new(HashMap::new()),
            rejected: SkipMap::new(),
            allocations: boxcar::Vec::new(),
            commits: boxcar::Vec::new(),
        }
    }

    /// Add a method row and its body
    #[must_use]
    pub fn with_method(self, def: MethodDef, body: Vec<u8>) -> Self {
        self.add_method(def, body);
        self
    }

    /// Add a `StandAloneSig` or `TypeSpec` blob
    #[must_use]
    pub fn with_signature(self, token: Token, blob: Vec<u8>) -> Self {
        self.add_signature(token, blob);
        self
    }

    /// Name a `TypeDef` or `TypeRef`
    #[must_use]
    pub fn with_type_name(self, token: Token, name: &str) -> Self {
        self.type_names.insert(token, name.to_string());
        self.bump_rows(token);
        self
    }

    /// Declare `rows` existing rows in `table`
    #[must_use]
    pub fn with_row_count(self, table: TableId, rows: u32) -> Self {
        let mut counts = lock!(self.rows);
        let current = counts.entry(table).or_insert(0);
        *current = (*current).max(rows);
        drop(counts);
        self
    }

    /// Make commits of `token` fail with `reason`
    #[must_use]
    pub fn with_rejected_commit(self, token: Token, reason: &str) -> Self {
        self.rejected.insert(token, reason.to_string());
        self
    }

    /// Add a method row and its body
    pub fn add_method(&self, def: MethodDef, body: Vec<u8>) {
        self.bump_rows(def.token);
        if !body.is_empty() {
            self.bodies.insert(def.token, body);
        }
        self.methods.insert(def.token, def);
    }

    /// Add a `StandAloneSig` or `TypeSpec` blob
    pub fn add_signature(&self, token: Token, blob: Vec<u8>) {
        self.bump_rows(token);
        self.blobs.insert(token, blob);
    }

    /// Change the reported load state
    pub fn set_load_state(&self, state: LoadState) {
        *lock!(self.state) = state;
    }

    /// Every accepted commit, in commit order
    #[must_use]
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.iter().map(|(_, record)| record.clone()).collect()
    }

    /// Every token minted through [`Module::allocate_token`], in allocation order
    #[must_use]
    pub fn allocations(&self) -> Vec<(Token, TokenRequest)> {
        self.allocations
            .iter()
            .map(|(_, allocation)| allocation.clone())
            .collect()
    }

    /// A string minted into the user string heap
    #[must_use]
    pub fn user_string(&self, token: Token) -> Option<String> {
        self.user_strings
            .get(&token)
            .map(|entry| entry.value().clone())
    }

    /// The request a minted token was created for
    #[must_use]
    pub fn allocation(&self, token: Token) -> Option<TokenRequest> {
        self.allocations
            .iter()
            .find(|(_, (minted, _))| *minted == token)
            .map(|(_, (_, request))| request.clone())
    }

    fn bump_rows(&self, token: Token) {
        if let Some(table) = token.table_id() {
            let mut counts = lock!(self.rows);
            let current = counts.entry(table).or_insert(0);
            *current = (*current).max(token.row());
        }
    }
}

impl Module for InMemoryModule {
    fn id(&self) -> ModuleId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load_state(&self) -> LoadState {
        *lock!(self.state)
    }

    fn enumerate_methods(&self) -> Result<Vec<MethodDef>> {
        Ok(self
            .methods
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn method_def(&self, token: Token) -> Result<MethodDef> {
        self.methods
            .get(&token)
            .map(|entry| entry.value().clone())
            .ok_or(Error::TokenNotFound(token))
    }

    fn method_body(&self, token: Token) -> Result<Vec<u8>> {
        self.bodies
            .get(&token)
            .map(|entry| entry.value().clone())
            .ok_or(Error::TokenNotFound(token))
    }

    fn signature_blob(&self, token: Token) -> Result<Vec<u8>> {
        self.blobs
            .get(&token)
            .map(|entry| entry.value().clone())
            .ok_or(Error::TokenNotFound(token))
    }

    fn token_ranges(&self) -> Result<Vec<TokenRange>> {
        let counts = lock!(self.rows);
        let mut ranges: Vec<TokenRange> = counts
            .iter()
            .map(|(table, rows)| TokenRange {
                table: *table,
                rows: *rows,
            })
            .collect();
        ranges.sort_by_key(|range| range.table);
        Ok(ranges)
    }

    fn allocate_token(&self, request: &TokenRequest) -> Result<Token> {
        let table = request.kind().table();
        let token = {
            let mut counts = lock!(self.rows);
            let rows = counts.entry(table).or_insert(0);
            if *rows >= MAX_ROW {
                return Err(Error::TokenSpaceExhausted(table.raw()));
            }
            *rows += 1;
            Token::from_parts(table, *rows)
        };

        match request {
            TokenRequest::StandAloneSig(blob) | TokenRequest::TypeSpec(blob) => {
                self.blobs.insert(token, blob.clone());
            }
            TokenRequest::UserString(value) => {
                self.user_strings.insert(token, value.clone());
            }
            TokenRequest::MemberRef { .. } => {}
        }

        self.allocations.push((token, request.clone()));
        Ok(token)
    }

    fn commit_method_body(&self, token: Token, body: &[u8], locals: Option<Token>) -> Result<()> {
        if let Some(reason) = self.rejected.get(&token) {
            return Err(Error::CommitRejected {
                token,
                reason: reason.value().clone(),
            });
        }

        if !self.methods.contains_key(&token) {
            return Err(Error::CommitRejected {
                token,
                reason: "no such method".to_string(),
            });
        }

        self.bodies.insert(token, body.to_vec());
        self.commits.push(CommitRecord {
            token,
            body: body.to_vec(),
            locals,
        });
        Ok(())
    }

    fn type_name(&self, token: Token) -> Option<String> {
        self.type_names
            .get(&token)
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::MethodAttributes;

    fn def(row: u32) -> MethodDef {
        MethodDef {
            token: Token::from_parts(TableId::MethodDef, row),
            declaring_type: "Shop.Cart".into(),
            name: format!("M{row}"),
            flags: MethodAttributes::empty(),
            impl_flags: 0,
            declaring_type_is_value: false,
            signature: vec![0x00, 0x00, 0x01],
        }
    }

    #[test]
    fn test_methods_in_token_order() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(2), "Shop")
            .with_method(def(3), vec![0x06, 0x2A])
            .with_method(def(1), vec![0x06, 0x2A]);

        let rows: Vec<u32> = module
            .enumerate_methods()?
            .iter()
            .map(|method| method.token.row())
            .collect();
        assert_eq!(rows, vec![1, 3]);
        assert_eq!(module.method_def(Token::new(0x0600_0003))?.name, "M3");
        assert!(matches!(
            module.method_def(Token::new(0x0600_0002)),
            Err(Error::TokenNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_allocation_continues_after_existing_rows() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(2), "Shop")
            .with_signature(Token::new(0x1100_0004), vec![0x07, 0x01, 0x08]);

        let token = module.allocate_token(&TokenRequest::StandAloneSig(vec![0x07, 0x00]))?;
        assert_eq!(token, Token::new(0x1100_0005));
        assert_eq!(module.signature_blob(token)?, vec![0x07, 0x00]);

        let string = module.allocate_token(&TokenRequest::UserString("Run".into()))?;
        assert_eq!(module.user_string(string).as_deref(), Some("Run"));
        assert_eq!(module.allocations().len(), 2);
        Ok(())
    }

    #[test]
    fn test_commit_replaces_body() -> Result<()> {
        let module = InMemoryModule::new(ModuleId(2), "Shop").with_method(def(1), vec![0x06, 0x2A]);
        let token = Token::new(0x0600_0001);

        module.commit_method_body(token, &[0x0A, 0x00, 0x2A], None)?;
        assert_eq!(module.method_body(token)?, vec![0x0A, 0x00, 0x2A]);
        assert_eq!(module.commits().len(), 1);

        assert!(matches!(
            module.commit_method_body(Token::new(0x0600_0009), &[0x06, 0x2A], None),
            Err(Error::CommitRejected { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_rejected_commit() {
        let token = Token::new(0x0600_0001);
        let module = InMemoryModule::new(ModuleId(2), "Shop")
            .with_method(def(1), vec![0x06, 0x2A])
            .with_rejected_commit(token, "body is executing");

        let result = module.commit_method_body(token, &[0x06, 0x2A], None);
        assert!(matches!(result, Err(Error::CommitRejected { reason, .. }) if reason == "body is executing"));
        assert!(module.commits().is_empty());
    }
}
