// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub(crate) mod posix;

#[cfg(not(unix))]
compile_error!(
    "syncq requires a POSIX host: named shared memory plus process-shared \
     pthread mutex and condition variable"
);
