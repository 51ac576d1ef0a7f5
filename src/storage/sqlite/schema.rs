use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    ProcessedBlocks,
    Transactions,
    Tokens,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::ProcessedBlocks, Table::Transactions, Table::Tokens];

    pub fn create_statement(self) -> &'static str {
        match self {
            Table::ProcessedBlocks => PROCESSED_BLOCKS_SCHEMA,
            Table::Transactions => TRANSACTIONS_SCHEMA,
            Table::Tokens => TOKENS_SCHEMA,
        }
    }

    pub fn index_statements(self) -> &'static [&'static str] {
        match self {
            Table::Transactions => &[
                "CREATE INDEX IF NOT EXISTS idx_transactions_block_number ON transactions (block_number)",
            ],
            Table::ProcessedBlocks | Table::Tokens => &[],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::ProcessedBlocks => "processed_blocks",
            Table::Transactions => "transactions",
            Table::Tokens => "tokens",
        };
        f.write_str(name)
    }
}

const PROCESSED_BLOCKS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_blocks (
    block_number INTEGER PRIMARY KEY NOT NULL,
    processed_at TEXT NOT NULL
)";

const TRANSACTIONS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transactions (
    hash TEXT PRIMARY KEY NOT NULL,
    block_number INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    from_address TEXT NOT NULL,
    to_address TEXT NOT NULL,
    value TEXT NOT NULL,
    gas_used TEXT NOT NULL,
    gas_price TEXT NOT NULL,
    input TEXT NOT NULL,
    status TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    contract_address TEXT,
    is_sonicx_token INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)";

const TOKENS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tokens (
    address TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    symbol TEXT NOT NULL,
    decimals INTEGER NOT NULL,
    creation_tx TEXT NOT NULL,
    creator TEXT NOT NULL,
    is_sonicx_token INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)";
