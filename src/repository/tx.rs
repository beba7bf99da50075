// ==========================================
// 物料批次追溯引擎 - 事务执行器
// ==========================================
// 职责: 在共享连接上以 BEGIN IMMEDIATE 执行一个工作单元
// 说明: 闭包返回 Err 时事务随 drop 回滚，不落任何部分写入
// ==========================================

use crate::repository::error::RepositoryError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex};

/// 在写事务中执行闭包
///
/// # 说明
/// - 进程内由 Mutex 串行化
/// - 跨进程由 IMMEDIATE 写锁串行化（同一批次并发扣减不会交错）
pub fn run_in_write_tx<T, E, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<RepositoryError>,
{
    let mut guard = conn
        .lock()
        .map_err(|e| E::from(RepositoryError::LockError(e.to_string())))?;

    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| E::from(RepositoryError::DatabaseTransactionError(e.to_string())))?;

    let out = f(&tx)?;

    tx.commit()
        .map_err(|e| E::from(RepositoryError::DatabaseTransactionError(e.to_string())))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryResult;

    fn setup() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (v INTEGER)", []).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn count(conn: &Arc<Mutex<Connection>>) -> i64 {
        conn.lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_on_ok() {
        let conn = setup();
        let r: RepositoryResult<()> = run_in_write_tx(&conn, |tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Ok(())
        });
        assert!(r.is_ok());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_rollback_on_err() {
        let conn = setup();
        let r: RepositoryResult<()> = run_in_write_tx(&conn, |tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Err(RepositoryError::InternalError("boom".to_string()))
        });
        assert!(r.is_err());
        assert_eq!(count(&conn), 0);
    }
}
