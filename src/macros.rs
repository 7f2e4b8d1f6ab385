/// Helper macro for reading locked items
///
/// Poisoning is recovered from, since every structure guarded this way is replaced
/// atomically and can never be observed half-written.
///
/// ```rust, ignore
///  let data = read_lock!(my_rwlock);
///  println!("{}", data.len());
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut data = write_lock!(my_rwlock);
///  *data = new_snapshot;
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for locking a mutex, recovering from poisoning
///
/// ```rust, ignore
///  let _guard = lock!(creating);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}
