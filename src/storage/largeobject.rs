//! Large-object helpers driven through the server-side `lo_*` SQL functions.
//! Descriptors only live inside the transaction that opened them, so every
//! helper takes the caller's `Transaction`.

use tokio_postgres::Transaction;

use super::{backend, StoreError};

const INV_WRITE: i32 = 0x0002_0000;
const INV_READ: i32 = 0x0004_0000;

/// Bytes moved per `lowrite`/`loread` round trip.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Allocate an empty large object and return its oid.
pub async fn create(tx: &Transaction<'_>) -> Result<u32, StoreError> {
    let row = tx.query_one("SELECT lo_create(0)", &[]).await.map_err(backend("lo_create"))?;
    Ok(row.get::<_, u32>(0))
}

async fn open(tx: &Transaction<'_>, oid: u32, mode: i32) -> Result<i32, StoreError> {
    let row = tx
        .query_one("SELECT lo_open($1, $2)", &[&oid, &mode])
        .await
        .map_err(backend(format!("lo_open {}", oid)))?;
    Ok(row.get::<_, i32>(0))
}

async fn close(tx: &Transaction<'_>, fd: i32) -> Result<(), StoreError> {
    tx.execute("SELECT lo_close($1)", &[&fd]).await.map_err(backend("lo_close"))?;
    Ok(())
}

/// Stream `data` into `oid` from offset zero.
pub async fn write_all(tx: &Transaction<'_>, oid: u32, data: &[u8]) -> Result<(), StoreError> {
    let fd = open(tx, oid, INV_WRITE).await?;
    for chunk in data.chunks(CHUNK_SIZE) {
        let row = tx
            .query_one("SELECT lowrite($1, $2)", &[&fd, &chunk])
            .await
            .map_err(backend(format!("lowrite {}", oid)))?;
        let written: i32 = row.get(0);
        if written as usize != chunk.len() {
            return Err(StoreError::Unavailable(format!(
                "short write to large object {}: {} of {} bytes",
                oid,
                written,
                chunk.len()
            )));
        }
    }
    close(tx, fd).await
}

/// Read the whole object back.
pub async fn read_all(tx: &Transaction<'_>, oid: u32) -> Result<Vec<u8>, StoreError> {
    let fd = open(tx, oid, INV_READ).await?;
    let mut out = Vec::new();
    let want = CHUNK_SIZE as i32;
    loop {
        let row = tx
            .query_one("SELECT loread($1, $2)", &[&fd, &want])
            .await
            .map_err(backend(format!("loread {}", oid)))?;
        let chunk: Vec<u8> = row.get(0);
        let done = chunk.len() < CHUNK_SIZE;
        out.extend_from_slice(&chunk);
        if done { break; }
    }
    close(tx, fd).await?;
    Ok(out)
}

pub async fn unlink(tx: &Transaction<'_>, oid: u32) -> Result<(), StoreError> {
    tx.execute("SELECT lo_unlink($1)", &[&oid])
        .await
        .map_err(backend(format!("lo_unlink {}", oid)))?;
    Ok(())
}
