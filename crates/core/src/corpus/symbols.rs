//! Symbol-table parsing (`nm` layout).

use std::collections::HashMap;

use crate::error::{CfpError, CfpResult};

/// Addresses of text (`t`/`T`) symbols.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    text: HashMap<String, u64>,
}

impl SymbolTable {
    /// Parse `nm` output: `<hex address> <type> <name>` per line.
    ///
    /// Undefined symbols (no address) are skipped. When a name appears at
    /// several addresses, the highest `(address, name)` entry wins.
    pub fn parse(text: &str) -> CfpResult<Self> {
        let mut entries = Vec::new();
        for (n, row) in text.lines().enumerate() {
            let cols: Vec<&str> = row.split_whitespace().collect();
            match cols.as_slice() {
                [] | [_, _] => continue,
                [addr, kind, name, ..] => {
                    let address = u64::from_str_radix(addr, 16).map_err(|_| {
                        CfpError::malformed(n + 1, format!("bad symbol address {addr:?}"))
                    })?;
                    if matches!(*kind, "t" | "T") {
                        entries.push((address, name.to_string()));
                    }
                }
                [_] => return Err(CfpError::malformed(n + 1, "truncated symbol row")),
            }
        }
        entries.sort();
        let text = entries.into_iter().map(|(address, name)| (name, address)).collect();
        Ok(Self { text })
    }

    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.text.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
