#[cfg(test)]
mod results_tests {
    use crate::process::CrossotopeError;
    use crate::results::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn sample_rows() -> Vec<ResultRow> {
        vec![
            ResultRow { nrh: 3, ix: 2, left: 1520, right: 0 },
            ResultRow { nrh: 17, ix: 9, left: 804, right: 311 },
            ResultRow { nrh: 42, ix: 1, left: 0, right: 2048 },
        ]
    }

    #[test]
    fn test_result_table_rows() {
        let mut table = ResultTable::zeros(2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.row(1), ResultRow { nrh: 0, ix: 0, left: 0, right: 0 });

        let row = ResultRow { nrh: 5, ix: 4, left: 100, right: 200 };
        table.set_row(1, &row);
        assert_eq!(table.row(1), row);
        assert_eq!(table.values().shape(), &[2, 4]);
        assert_eq!(table.values()[[1, 3]], 200);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let path = ResultTable::output_path(dir.path(), "sub-01");
        assert_eq!(path, dir.path().join("sub-01_results.csv"));

        let table = ResultTable::from_rows(&sample_rows());
        table.write_csv(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("nrh,ix,L,R"));
        assert_eq!(lines.next(), Some("3,2,1520,0"));

        let read_back = ResultTable::read_csv(&path).unwrap();
        assert_eq!(read_back.rows(), sample_rows());
        assert_eq!(read_back, table);
    }

    #[test]
    fn test_empty_table_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty_results.csv");
        ResultTable::zeros(0).write_csv(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "nrh,ix,L,R\n");
        assert!(ResultTable::read_csv(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_foreign_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.csv");
        fs::write(&path, "# nrh,ix,L,R\n1,1,1,1\n").unwrap();
        assert!(matches!(
            ResultTable::read_csv(&path),
            Err(CrossotopeError::InputValidation(_))
        ));
        assert!(ResultTable::read_csv(Path::new("/definitely/not/here.csv")).is_err());
    }
}
