//! Fallback SQL-states for ERR packets that omit the `#SSSSS` marker.

/// General error
pub const GENERAL_ERROR: &str = "HY000";

/// SQL-state for a server error code.
pub fn sql_state_for_code(code: u16) -> &'static str {
    match code {
        1022 | 1048 | 1052 | 1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1557 | 1586 => "23000",
        1037 | 1038 => "HY001",
        1040 => "08004",
        1042 | 1043 | 1047 | 1053 | 1080 | 1081 | 1152 | 1153 | 1154 | 1155 | 1156 | 1157
        | 1158 | 1159 | 1160 | 1161 | 1184 | 1189 | 1190 => "08S01",
        1044 | 1049 | 1055 | 1056 | 1057 | 1059 | 1061 | 1063 | 1064 | 1065 | 1066 | 1067
        | 1068 | 1069 | 1070 | 1071 | 1072 | 1073 | 1074 | 1075 | 1083 | 1084 | 1090 | 1091
        | 1101 | 1102 | 1103 | 1104 | 1106 | 1107 | 1110 | 1112 | 1113 | 1115 | 1118 | 1120
        | 1121 | 1131 | 1132 | 1133 | 1139 | 1140 | 1141 | 1142 | 1143 | 1144 | 1145 | 1147
        | 1148 | 1149 | 1162 | 1163 | 1164 | 1166 | 1167 | 1170 | 1171 | 1172 | 1173 | 1177
        | 1178 | 1203 | 1211 | 1226 | 1227 | 1230 | 1231 | 1232 | 1234 | 1235 | 1239 | 1248
        | 1250 | 1252 | 1253 | 1280 | 1281 | 1303 | 1304 | 1305 | 1308 | 1309 | 1310 | 1311
        | 1312 | 1313 | 1314 | 1315 | 1316 | 1318 | 1319 | 1320 | 1322 | 1323 | 1324 | 1327
        | 1330 | 1331 | 1332 | 1333 | 1336 | 1337 | 1338 | 1370 | 1403 | 1407 | 1410 | 1413
        | 1414 | 1425 | 1426 | 1427 | 1437 | 1439 | 1453 | 1458 | 1460 | 1461 | 1463 => "42000",
        1045 => "28000",
        1046 => "3D000",
        1050 => "42S01",
        1051 | 1109 | 1146 => "42S02",
        1054 | 1247 => "42S22",
        1058 | 1136 => "21S01",
        1060 => "42S21",
        1082 => "42S12",
        1137 => "HY000",
        1179 | 1207 => "25000",
        1205 | 1213 => "40001",
        1222 | 1241 | 1242 => "21000",
        1264 | 1416 => "22003",
        1265 | 1406 => "01000",
        1292 | 1366 => "22007",
        1317 => "70100",
        1325 | 1326 => "24000",
        1329 => "02000",
        1339 => "20000",
        1365 => "22012",
        1367 => "22007",
        1397 | 1398 | 1399 | 1400 | 1401 | 1402 | 1440 => "XAE04",
        _ => GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        assert_eq!(sql_state_for_code(1146), "42S02");
        assert_eq!(sql_state_for_code(1045), "28000");
        assert_eq!(sql_state_for_code(1062), "23000");
        assert_eq!(sql_state_for_code(1213), "40001");
        assert_eq!(sql_state_for_code(1064), "42000");
    }

    #[test]
    fn unknown_code_is_general_error() {
        assert_eq!(sql_state_for_code(9999), GENERAL_ERROR);
    }
}
