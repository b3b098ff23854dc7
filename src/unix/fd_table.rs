use bitflags::bitflags;
use fdspawn_shared::fd_map::FdOperation;
use nix::{
    errno::Errno,
    unistd::{SysconfVar, sysconf},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FdRole: u8 {
        /// Read by some operation before the child's table is final.
        const SOURCE = 1 << 0;
        /// Must be open when the child execs.
        const DESTINATION = 1 << 1;
    }
}

/// Fallback when the open-file limit is indeterminate.
const DEFAULT_OPEN_MAX: i32 = 1024;

/// The number of descriptor slots a process may use.
pub fn open_file_limit() -> nix::Result<i32> {
    let limit = sysconf(SysconfVar::OPEN_MAX)?;
    Ok(limit.map_or(DEFAULT_OPEN_MAX, |limit| {
        i32::try_from(limit).unwrap_or(i32::MAX)
    }))
}

/// Roles of every descriptor below the open-file limit.
///
/// Only the prefix up to the highest mentioned descriptor is stored; every
/// slot past it has no role. Limits in the millions are common and the child
/// never needs to look at those slots one by one.
#[derive(Debug, Clone)]
pub struct FdTable {
    roles: Vec<FdRole>,
    limit: i32,
}

impl FdTable {
    /// Marks the descriptors `ops` touch.
    ///
    /// `Dup` marks its `src` as a source and its `dst` as a destination.
    /// `Close` withdraws the destination role and marks the descriptor as a
    /// source, so nothing is ever parked on a slot an operation rewrites.
    /// Any descriptor outside `0..limit` is `EBADF`.
    pub fn new(ops: &[FdOperation], limit: i32) -> nix::Result<Self> {
        let check = |fd: i32| {
            if (0..limit).contains(&fd) {
                Ok(fd as usize)
            } else {
                Err(Errno::EBADF)
            }
        };

        let mut highest = None;
        for op in ops {
            let touched = match *op {
                FdOperation::Dup { src, dst } => check(src)?.max(check(dst)?),
                FdOperation::Close(fd) => check(fd)?,
            };
            highest = highest.max(Some(touched));
        }

        let mut roles = vec![FdRole::empty(); highest.map_or(0, |fd| fd + 1)];
        for op in ops {
            match *op {
                FdOperation::Dup { src, dst } => {
                    roles[src as usize] |= FdRole::SOURCE;
                    roles[dst as usize] |= FdRole::DESTINATION;
                }
                FdOperation::Close(fd) => {
                    roles[fd as usize].remove(FdRole::DESTINATION);
                    roles[fd as usize] |= FdRole::SOURCE;
                }
            }
        }
        Ok(Self { roles, limit })
    }

    pub fn role(&self, fd: i32) -> FdRole {
        usize::try_from(fd)
            .ok()
            .and_then(|fd| self.roles.get(fd))
            .copied()
            .unwrap_or_default()
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }

    /// Number of slots stored explicitly. Slots at or past it have no role.
    pub fn explicit_len(&self) -> i32 {
        // bounded by `limit`, which is an i32
        self.roles.len() as i32
    }

    /// The lowest descriptor with no role, if one exists below the limit.
    pub fn lowest_free(&self) -> Option<i32> {
        let fd = self
            .roles
            .iter()
            .position(FdRole::is_empty)
            .unwrap_or(self.roles.len());
        let fd = i32::try_from(fd).ok()?;
        (fd < self.limit).then_some(fd)
    }

    /// Explicit slots the child must close: everything that is not a destination.
    pub fn closable(&self) -> impl Iterator<Item = i32> + '_ {
        (0..self.explicit_len()).filter(|fd| !self.role(*fd).contains(FdRole::DESTINATION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dup(src: i32, dst: i32) -> FdOperation {
        FdOperation::Dup { src, dst }
    }

    #[test]
    fn roles() {
        let table = FdTable::new(&[dup(7, 1), dup(1, 2), dup(4, 4)], 64).unwrap();
        assert_eq!(table.role(0), FdRole::empty());
        assert_eq!(table.role(1), FdRole::SOURCE | FdRole::DESTINATION);
        assert_eq!(table.role(2), FdRole::DESTINATION);
        assert_eq!(table.role(4), FdRole::SOURCE | FdRole::DESTINATION);
        assert_eq!(table.role(7), FdRole::SOURCE);
        assert_eq!(table.role(8), FdRole::empty());
        assert_eq!(table.role(-1), FdRole::empty());
        assert_eq!(table.explicit_len(), 8);
    }

    #[test]
    fn close_withdraws_destination() {
        let table = FdTable::new(&[dup(2, 9), dup(9, 1), FdOperation::Close(9)], 64).unwrap();
        assert_eq!(table.role(9), FdRole::SOURCE);
        assert_eq!(table.closable().collect::<Vec<_>>(), [0, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn lowest_free() {
        let table = FdTable::new(&[dup(0, 0), dup(1, 1), dup(2, 2), dup(3, 5)], 64).unwrap();
        assert_eq!(table.lowest_free(), Some(4));

        let table = FdTable::new(&[dup(0, 0), dup(1, 1), dup(2, 2)], 64).unwrap();
        assert_eq!(table.lowest_free(), Some(3));

        let table = FdTable::new(&[], 64).unwrap();
        assert_eq!(table.lowest_free(), Some(0));
    }

    #[test]
    fn no_free_slot_below_limit() {
        let table = FdTable::new(&[dup(0, 1), dup(2, 3)], 4).unwrap();
        assert_eq!(table.lowest_free(), None);
    }

    #[test]
    fn out_of_range_is_ebadf() {
        assert_eq!(FdTable::new(&[dup(-1, 1)], 64).unwrap_err(), Errno::EBADF);
        assert_eq!(FdTable::new(&[dup(1, 64)], 64).unwrap_err(), Errno::EBADF);
        assert_eq!(FdTable::new(&[FdOperation::Close(100)], 64).unwrap_err(), Errno::EBADF);
    }

    #[test]
    fn limit_is_positive() {
        assert!(open_file_limit().unwrap() > 2);
    }
}
